//! Subscriber example - connect, subscribe, and print deliveries.
//!
//! Run with: cargo run -p mqpico-client --example subscribe
//!
//! Expects a broker on localhost:1883 (e.g. mosquitto).

use std::net::TcpStream;
use std::thread;

use mqpico_client::{unbounded, Client, ClientConfig, Event, QoS};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let stream = TcpStream::connect("localhost:1883")?;
    let mut reader = stream.try_clone()?;

    let config = ClientConfig::new("mqpico-subscriber").keep_alive(30);
    let mut client = Client::new(stream, config);

    let code = client.connect(&mut reader)?;
    if !code.is_accepted() {
        println!("Broker refused connection: {:?}", code);
        return Ok(());
    }
    println!("Connected");

    let message_id = client.subscribe(&[("sensors/#", QoS::AtMostOnce)])?;
    println!("SUBSCRIBE sent (message id {})", message_id);

    let (tx, rx) = unbounded();
    let dispatcher = client.dispatcher(reader, tx);
    let loop_handle = thread::spawn(move || dispatcher.run());

    for event in rx {
        match event {
            Event::Suback { message_id, granted } => {
                println!("Subscribed (message id {}): granted {:?}", message_id, granted);
            }
            Event::Message { topic, payload, .. } => {
                println!(
                    "{} -> {}",
                    String::from_utf8_lossy(&topic),
                    String::from_utf8_lossy(&payload)
                );
            }
            Event::Disconnected { reason } => {
                println!("Disconnected: {:?}", reason);
                break;
            }
            _ => {}
        }
    }

    loop_handle.join().expect("dispatch thread panicked")?;
    Ok(())
}
