use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use nvdrv::devices::ctrl::SYNCPOINT_WAIT_EVENT_SINGLE;
use nvdrv::devices::nvmap::PARAM;
use nvdrv::prelude::*;

pub fn bench_descriptor_roundtrip(c: &mut Criterion) {
    c.bench_function("descriptor_from_raw", |b| {
        b.iter(|| IoctlDescriptor::from_raw(black_box(0xC010_001D)).raw())
    });
}

pub fn bench_nvmap_param(c: &mut Criterion) {
    let service = NvDrvService::new(
        DriverConfig::default(),
        Arc::new(SoftHost1x::default()),
        SessionContext::application(),
    );
    let (fd, _) = service.open("/dev/nvmap");

    let mut input = [0u8; 0xC];
    0x1000u32.encode(&mut input[0..4]);
    let mut create_out = [0u8; 8];
    service
        .ioctl(fd, nvdrv::devices::nvmap::CREATE, Some(&input[..8]), Some(&mut create_out[..]))
        .ok();
    input[0..4].copy_from_slice(&create_out[4..8]);
    1u32.encode(&mut input[4..8]);

    c.bench_function("nvmap_param_dispatch", |b| {
        let mut output = [0u8; 0xC];
        b.iter(|| service.ioctl(fd, PARAM, Some(black_box(&input[..])), Some(&mut output[..])))
    });
}

pub fn bench_expired_wait(c: &mut Criterion) {
    let host1x = Arc::new(SoftHost1x::default());
    host1x.increment_by(1, 100);
    let service = NvDrvService::new(
        DriverConfig::default(),
        host1x,
        SessionContext::application(),
    );
    let (fd, _) = service.open("/dev/nvhost-ctrl");

    let mut input = [0u8; 0x10];
    Fence::new(1, 50).encode(&mut input[0..8]);

    c.bench_function("ctrl_expired_wait", |b| {
        let mut output = [0u8; 0x10];
        b.iter(|| {
            service.ioctl(
                fd,
                SYNCPOINT_WAIT_EVENT_SINGLE,
                Some(black_box(&input[..])),
                Some(&mut output[..]),
            )
        })
    });
}

criterion_group!(
    benches,
    bench_descriptor_roundtrip,
    bench_nvmap_param,
    bench_expired_wait
);
criterion_main!(benches);
