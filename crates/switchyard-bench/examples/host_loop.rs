//! A host frame loop serving RPCs between simulation steps.
//!
//! Demonstrates: register services → initialize → activate → tick once
//! per frame → switch time mode → restart → shut down.

use std::cell::Cell;
use std::rc::Rc;

use switchyard_bench::{reference_handlers, REFERENCE_PORT, REFERENCE_SERVICE};
use switchyard_core::Status;
use switchyard_engine::{DispatchConfig, Dispatcher, HandlerDescriptor, TimeMode};
use switchyard_test_utils::{MockTransport, Op};

/// Host-side state exposed over RPC.
struct Frame {
    index: Cell<u64>,
}

fn frame_handlers() -> Vec<HandlerDescriptor> {
    vec![HandlerDescriptor::unary::<Frame, _>("Current", |frame, _req, r| {
        r.respond(frame.index.get().to_le_bytes().to_vec(), Status::ok());
    })]
}

fn main() {
    println!("=== Switchyard Host Loop Example ===\n");

    let transport = MockTransport::new();
    transport.set_write_delay(1);
    let mut d = Dispatcher::new(transport.clone(), DispatchConfig::default()).unwrap();
    d.register(REFERENCE_SERVICE, reference_handlers()).unwrap();
    d.register("host.Frame", frame_handlers()).unwrap();
    d.initialize(REFERENCE_PORT).unwrap();

    let frame = Rc::new(Frame {
        index: Cell::new(0),
    });
    d.activate_service("host.Frame", &frame).unwrap();

    // --- Wall-clock frames: stay inside the per-frame budget ---
    println!("Wall-clock: 60 frames");
    for i in 0..60u64 {
        frame.index.set(i);
        if i % 10 == 0 {
            transport.inject_call("host.Frame", "Current", Vec::new());
            transport.inject_call(REFERENCE_SERVICE, "Count", vec![4]);
        }
        let m = d.tick();
        if i % 20 == 0 {
            println!(
                "  frame {i:3}: polls={} events={} accepted={} elapsed={}us",
                m.polls, m.events, m.calls_accepted, m.elapsed_us
            );
        }
    }

    // --- Fixed-step frames: every write lands before the frame ends ---
    d.set_time_mode(TimeMode::FixedStep);
    println!("\nFixed-step: 10 frames");
    for i in 60..70u64 {
        frame.index.set(i);
        transport.inject_call(REFERENCE_SERVICE, "Echo", i.to_le_bytes().to_vec());
        let m = d.tick();
        println!(
            "  frame {i:3}: final_writes={} awaited={} finished={}",
            m.final_writes, m.awaited_writes, m.calls_finished
        );
    }

    // --- Restart keeps the active instance bound ---
    d.reinitialize().unwrap();
    println!(
        "\nRestarted: host.Frame active = {}",
        d.is_service_active("host.Frame")
    );
    let tag = transport.inject_call("host.Frame", "Current", Vec::new());
    d.tick();
    d.tick();
    if let Some(Op::WriteFinal { payload, .. }) = tag.and_then(|t| transport.ops_for(t).pop()) {
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&payload[..8]);
        println!("  current frame over RPC: {}", u64::from_le_bytes(bytes));
    }

    d.deinitialize();
    let c = d.counters();
    println!("\n=== Summary ===");
    println!("  ticks:          {}", c.ticks);
    println!("  calls accepted: {}", c.calls_accepted);
    println!("  calls finished: {}", c.calls_finished);
    println!("  calls aborted:  {}", c.calls_aborted);
    println!("  slots cancelled:{}", c.slots_cancelled);
    println!("  stream writes:  {}", c.stream_writes);
}
