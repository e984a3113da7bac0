//! Channel-list discovery: the "device" opens a handful of channels, and
//! the "host" asks it, over the wire, which channels are open.

use std::sync::Arc;
use std::time::Duration;

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

    for &chan in &[1u8, 2, 20, 63] {
        device.open_channel(chan, 0, 0).unwrap();
    }

    let mut channels = host.chan_list_req(Some(Duration::from_secs(5))).unwrap();
    channels.sort_unstable();
    println!("device reports open channels: {channels:?}");

    host.close_connection();
    device.close_connection();
}
