//! mqpico-client - Blocking MQTT 3.1 client.
//!
//! This crate pairs the `mqpico-core` codec with a blocking transport: a
//! [`Client`] bound to the write half builds and sends frames, and a
//! [`Dispatcher`] owns the read half, classifying every inbound frame and
//! delivering it as an [`Event`]. A `TcpStream` plus `try_clone()` supplies
//! the two halves.
//!
//! # Example
//!
//! ```ignore
//! use mqpico_client::{Client, ClientConfig, Event, QoS};
//!
//! let stream = std::net::TcpStream::connect("localhost:1883")?;
//! let mut reader = stream.try_clone()?;
//!
//! let mut client = Client::new(stream, ClientConfig::new("sensor-1"));
//! let code = client.connect(&mut reader)?;
//! assert!(code.is_accepted());
//!
//! client.subscribe(&[("sensors/#", QoS::AtMostOnce)])?;
//! client.publish("sensors/temp", b"25.5")?;
//!
//! // Hand the read half to the dispatch loop on its own thread
//! let (tx, rx) = mqpico_client::unbounded();
//! let dispatcher = client.dispatcher(reader, tx);
//! std::thread::spawn(move || dispatcher.run());
//!
//! for event in rx {
//!     if let Event::Message { topic, payload, .. } = event {
//!         println!("{:?}: {:?}", topic, payload);
//!     }
//! }
//! ```

mod client;
mod config;
mod dispatch;
mod error;
mod events;
mod transport;

pub use client::Client;
pub use config::ClientConfig;
pub use dispatch::Dispatcher;
pub use error::{ClientError, Result};
pub use events::Event;

// Channel types accepted by `Client::dispatcher`
pub use crossbeam_channel::{unbounded, Receiver, Sender};

// Re-export useful types from core
pub use mqpico_core::{ConnectReturnCode, Limits, QoS};
