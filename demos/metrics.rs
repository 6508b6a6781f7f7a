use bercon::server::RconServer;
use std::thread;
use std::time::Duration;

fn main() -> std::io::Result<()> {
    env_logger::init();

    let server = RconServer::new("127.0.0.1", 2301, "test");

    let metrics = server.metrics.clone();
    thread::spawn(move || loop {
        thread::sleep(Duration::from_secs(10));
        eprintln!("{}", metrics.export_metrics());
    });

    eprintln!("RCON server listening on 127.0.0.1:2301");
    eprintln!("Metrics exported every 10 seconds");

    server.listen()
}
