use bercon::packet;
use bercon::server::RconServer;

fn main() -> std::io::Result<()> {
    env_logger::init();

    let server = RconServer::new("0.0.0.0", 2301, "test");

    let handle = server.clone();
    let server = server.on_command(move |seq, command, from| {
        println!("command {command} {seq} {from}");

        let reply = packet::command_response(seq, format!("echo {command}").as_bytes());
        if let Err(err) = handle.send_response(from, &reply) {
            eprintln!("{from}: {err}");
        }

        let message = packet::server_message(
            handle.next_sequence_number(),
            format!("GLOBAL: echo {command}").as_bytes(),
        );
        handle.broadcast(&message);
    });

    eprintln!("RCON server listening on 0.0.0.0:2301");
    eprintln!("Press Ctrl+C to exit");

    server.listen()
}
