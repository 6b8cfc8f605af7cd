//! Publisher example - connect and publish a few readings.
//!
//! Run with: cargo run -p mqpico-client --example publish
//!
//! Expects a broker on localhost:1883 (e.g. mosquitto).

use std::net::TcpStream;
use std::thread;
use std::time::Duration;

use mqpico_client::{unbounded, Client, ClientConfig, Event};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let stream = TcpStream::connect("localhost:1883")?;
    let mut reader = stream.try_clone()?;

    let config = ClientConfig::new("mqpico-publisher").keep_alive(30);
    let mut client = Client::new(stream, config);

    let code = client.connect(&mut reader)?;
    if !code.is_accepted() {
        println!("Broker refused connection: {:?}", code);
        return Ok(());
    }
    println!("Connected");

    // The dispatch loop keeps the socket serviced (broker pings, acks)
    // while this thread produces.
    let (tx, rx) = unbounded();
    let dispatcher = client.dispatcher(reader, tx);
    thread::spawn(move || {
        if let Err(err) = dispatcher.run() {
            eprintln!("dispatch loop ended: {}", err);
        }
    });
    thread::spawn(move || {
        for event in rx {
            if let Event::Pingresp = event {
                println!("Broker answered our ping");
            }
        }
    });

    for reading in 0..5 {
        let payload = format!("{{\"reading\":{}}}", reading);
        client.publish("sensors/demo", payload.as_bytes())?;
        println!("Published reading {}", reading);
        thread::sleep(Duration::from_secs(1));
    }

    client.ping()?;
    thread::sleep(Duration::from_millis(500));
    client.disconnect()?;
    println!("Done");
    Ok(())
}
