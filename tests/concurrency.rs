// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Concurrent use of devices from several threads.

mod common;

use std::sync::{Arc, Barrier};
use std::thread;

use common::{RecordingTransport, sample_device};
use homie_device::{DeviceState, Topic};

#[test]
fn concurrent_updates_on_one_device_are_serialized() {
    let (device, n1, p1) = sample_device();
    let transport = RecordingTransport::new();
    device.connect_with(transport.clone()).unwrap();
    transport.clear();

    let threads = 8;
    let barrier = Arc::new(Barrier::new(threads));
    let handles: Vec<_> = (0..threads)
        .map(|i| {
            let barrier = Arc::clone(&barrier);
            let (n1, p1) = (n1.clone(), p1.clone());
            thread::spawn(move || {
                barrier.wait();
                if i % 2 == 0 {
                    p1.update_attribute("unit", &format!("u{i}")).unwrap();
                } else {
                    n1.update_attribute("location", &format!("room{i}")).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    // Every cycle is a complete init/ready pair: no interleaving
    let states = transport.states();
    assert_eq!(states.len(), threads * 2);
    for pair in states.chunks(2) {
        assert_eq!(pair, ["init", "ready"]);
    }
    assert_eq!(device.state(), DeviceState::Ready);
}

#[test]
fn snapshots_are_never_torn() {
    let (device, _, p1) = sample_device();
    let transport = RecordingTransport::new();
    device.connect_with(transport.clone()).unwrap();
    transport.clear();

    let threads = 4;
    let barrier = Arc::new(Barrier::new(threads));
    let handles: Vec<_> = (0..threads)
        .map(|i| {
            let barrier = Arc::clone(&barrier);
            let p1 = p1.clone();
            thread::spawn(move || {
                barrier.wait();
                p1.update_attribute("unit", &format!("u{i}")).unwrap();
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    // Between two state messages, exactly one full property snapshot
    let topics = transport.topics();
    let cycles: Vec<&[String]> = topics
        .split(|t| t.ends_with("/$state"))
        .filter(|chunk| !chunk.is_empty())
        .collect();
    assert_eq!(cycles.len(), threads);
    for cycle in cycles {
        assert_eq!(cycle.len(), 6);
        assert_eq!(cycle[0], "homie/dev1/n1/p1/$name");
        assert_eq!(cycle[5], "homie/dev1/n1/p1/$unit");
    }
}

#[test]
fn separate_devices_progress_independently() {
    let barrier = Arc::new(Barrier::new(2));
    let handles: Vec<_> = (0..2)
        .map(|_| {
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let (device, _, p1) = sample_device();
                let transport = RecordingTransport::new();
                device.connect_with(transport.clone()).unwrap();
                barrier.wait();
                for i in 0..50 {
                    p1.set_value(i % 10).unwrap();
                }
                (device.state(), transport.states())
            })
        })
        .collect();

    for handle in handles {
        let (state, states) = handle.join().unwrap();
        assert_eq!(state, DeviceState::Ready);
        assert_eq!(states, ["init", "ready"]);
    }
}

#[test]
fn inbound_messages_race_with_updates() {
    let (device, _, p1) = sample_device();
    let transport = RecordingTransport::new();
    device.connect_with(transport.clone()).unwrap();

    let barrier = Arc::new(Barrier::new(2));
    let writer = {
        let barrier = Arc::clone(&barrier);
        let device = device.clone();
        thread::spawn(move || {
            barrier.wait();
            for i in 0..20 {
                device.handle_message("homie/dev1/n1/p1/set", (i % 10).to_string().as_bytes());
            }
        })
    };
    let updater = {
        let barrier = Arc::clone(&barrier);
        let p1 = p1.clone();
        thread::spawn(move || {
            barrier.wait();
            for i in 0..20 {
                p1.update_attribute("unit", &format!("u{i}")).unwrap();
            }
        })
    };
    writer.join().unwrap();
    updater.join().unwrap();

    assert_eq!(device.state(), DeviceState::Ready);
    assert!(p1.value().is_some());
    assert!(p1.is_connected());
}
