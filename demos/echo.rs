//! Two engines over an in-process loopback: the "host" sends a message on
//! channel 1, the "device" echoes it back, the host verifies the echo.
//!
//! No real transport is in scope here (see the crate's non-goals), so both
//! ends run in one process connected by [`mcom::LoopbackDriver`] rather
//! than, say, a pair of UARTs.

use std::sync::Arc;
use std::thread;

use log::LevelFilter;

use mcom::{ComDriver, Engine, LoopbackDriver};

fn main() {
    log::set_max_level(LevelFilter::Trace);
    env_logger::init();

    let (host_driver, device_driver) = LoopbackDriver::pair();
    let host = Arc::new(Engine::new(Arc::new(host_driver) as Arc<dyn ComDriver>));
    let device = Arc::new(Engine::new(Arc::new(device_driver) as Arc<dyn ComDriver>));
    host.start_com().unwrap();
    device.start_com().unwrap();

    host.open_channel(1, 64, 64).unwrap();
    device.open_channel(1, 64, 64).unwrap();

    let message = b"hello world";
    println!("host: sending {:?}", message);

    let echo_device = Arc::clone(&device);
    let device_thread = thread::Builder::new()
        .name("device".into())
        .spawn(move || {
            let got = echo_device.rx(1, message.len(), true, None).unwrap();
            println!("device: echoing {:?}", got);
            echo_device.tx(1, &got, true, None).unwrap();
        })
        .unwrap();

    host.tx(1, message, true, None).unwrap();
    let got = host.rx(1, message.len(), true, None).unwrap();
    println!("host: received {:?}", got);
    assert_eq!(got, message);

    device_thread.join().unwrap();
    host.close_connection();
    device.close_connection();
}
