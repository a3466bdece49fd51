//! Wait on a syncpoint from one thread while another plays the GPU
//!
//! Run with: cargo run --example syncpoint_wait

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use nvdrv::devices::ctrl::SYNCPOINT_WAIT_EVENT;
use nvdrv::prelude::*;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let host1x = Arc::new(SoftHost1x::default());
    let service = NvDrvService::new(
        DriverConfig::default(),
        host1x.clone(),
        SessionContext::application(),
    );

    let (fd, result) = service.open("/dev/nvhost-ctrl");
    println!("Opened /dev/nvhost-ctrl as fd {} ({})", fd, result);

    let fence = Fence::new(12, 4);
    let mut input = [0u8; 0x10];
    fence.encode(&mut input[0..8]);
    1000i32.encode(&mut input[8..12]);
    let mut output = [0u8; 0x10];

    let result = service.ioctl(fd, SYNCPOINT_WAIT_EVENT, Some(&input[..]), Some(&mut output[..]))?;
    let value = SyncpointEventValue::decode(&output[12..16]);
    println!("Wait returned {} with event value 0x{:08X}", result, value.raw());

    let (result, event) = service.query_event(fd, value.raw())?;
    let Some(event) = event else {
        println!("No event to wait on ({})", result);
        return Ok(());
    };

    let gpu = {
        let host1x = Arc::clone(&host1x);
        thread::spawn(move || {
            for _ in 0..fence.value {
                thread::sleep(Duration::from_millis(20));
                let value = host1x.increment(fence.id);
                println!("  GPU advanced syncpoint {} to {}", fence.id, value);
            }
        })
    };

    let signalled = event.wait_timeout(Duration::from_secs(5));
    println!("Event signalled: {}", signalled);
    gpu.join().map_err(|_| "GPU thread panicked")?;

    service.close(fd);
    Ok(())
}
