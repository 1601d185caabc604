use criterion::{black_box, criterion_group, criterion_main, Criterion};
use tn3270r::lib3270::address::encode_address;
use tn3270r::lib3270::{decode, AidKey, Screen, ScreenSize};

/// Erase/Write for a 24x80 form: a protected label and an input field on every row
fn sample_form() -> Vec<u8> {
    let mut data = vec![0xF5, 0xC2];
    for row in 0..24 {
        let address = row * 80;
        data.push(0x11);
        data.extend_from_slice(&encode_address(address, 1920));
        data.extend_from_slice(&[0x1D, 0x60]);
        data.extend_from_slice(&[0xD3, 0xC1, 0xC2, 0xC5, 0xD3, 0x7A]); // "LABEL:"
        data.extend_from_slice(&[0x1D, 0x40]);
        if row == 0 {
            data.push(0x13);
        }
        // RA to column 60
        let target = address + 60;
        data.push(0x3C);
        data.extend_from_slice(&encode_address(target, 1920));
        data.push(0x4B);
        data.extend_from_slice(&[0x1D, 0x60]);
    }
    data
}

fn bench_decode(c: &mut Criterion) {
    let data = sample_form();
    c.bench_function("decode_erase_write", |b| {
        b.iter(|| black_box(decode(black_box(&data), 1920)).unwrap())
    });
}

fn bench_apply(c: &mut Criterion) {
    let data = sample_form();
    c.bench_function("apply_erase_write", |b| {
        b.iter(|| {
            let mut screen = Screen::with_size(ScreenSize::MODEL_2);
            black_box(screen.process_datastream(black_box(&data))).unwrap();
            black_box(screen.logical_fields().len())
        })
    });
}

fn bench_type_and_enter(c: &mut Criterion) {
    let mut form = Screen::with_size(ScreenSize::MODEL_2);
    form.process_datastream(&sample_form()).unwrap();
    c.bench_function("type_and_enter", |b| {
        b.iter(|| {
            let mut screen = form.clone();
            screen.type_text(black_box("USER01")).unwrap();
            black_box(screen.press_aid(AidKey::Enter)).unwrap()
        })
    });
}

criterion_group!(benches, bench_decode, bench_apply, bench_type_and_enter);
criterion_main!(benches);
