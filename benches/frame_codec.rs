// Copyright 2022 Ryan Seipp
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::io::Cursor;

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use relay_core::message::{write_message, Frame, FrameReader, SubTag, Tag};

fn route_frame(ids: &[u64], hop: u32) -> Frame {
    let mut id_bytes = Vec::with_capacity(ids.len() * 8);
    for id in ids {
        id_bytes.extend_from_slice(&id.to_be_bytes());
    }
    Frame::new(Tag::OptionRequest)
        .push(SubTag::TargetId, id_bytes)
        .push(SubTag::Hop, hop.to_be_bytes().to_vec())
}

fn idmef_frame(payload_len: usize) -> Frame {
    Frame::new(Tag::Idmef).push(SubTag::Data, vec![0x42; payload_len])
}

fn bench_encode(c: &mut Criterion) {
    let admin = route_frame(&[1, 2, 3, 4, 5], 2);
    let idmef = idmef_frame(1024);

    c.bench_function("encode admin route", |b| {
        b.iter(|| black_box(admin.encode()))
    });
    c.bench_function("encode 1KiB idmef", |b| b.iter(|| black_box(idmef.encode())));
}

fn bench_decode(c: &mut Criterion) {
    let admin_bytes = route_frame(&[1, 2, 3, 4, 5], 2).encode();
    let idmef_bytes = idmef_frame(1024).encode();

    c.bench_function("read_message admin route", |b| {
        b.iter(|| {
            let mut reader = FrameReader::new();
            let mut cursor = Cursor::new(admin_bytes.clone());
            black_box(reader.read_message(&mut cursor).unwrap());
        })
    });

    c.bench_function("read_message 1KiB idmef", |b| {
        b.iter(|| {
            let mut reader = FrameReader::new();
            let mut cursor = Cursor::new(idmef_bytes.clone());
            black_box(reader.read_message(&mut cursor).unwrap());
        })
    });
}

fn bench_write(c: &mut Criterion) {
    let idmef = idmef_frame(1024);

    c.bench_function("write_message 1KiB idmef", |b| {
        b.iter(|| {
            let mut sink = Cursor::new(Vec::new());
            black_box(write_message(&mut sink, &idmef).unwrap());
        })
    });
}

criterion_group!(benches, bench_encode, bench_decode, bench_write);
criterion_main!(benches);
