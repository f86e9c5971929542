//! kestrel simulation harness
//!
//! Boots a kernel with the bundled simulation context switcher and plays
//! the part of the hardware and of every user process: it drives timer
//! ticks, issues syscalls on behalf of whichever process is active, and
//! pokes the operator surface. Ends by dumping the trace buffer and a JSON
//! snapshot of the final kernel state.

use kestrel::kernel::{
    EntryPoint, Kernel, MboxId, Message, Pid, Reply, SemHandle, SimContextSwitch, Syscall,
    TargetQueue,
};

fn expect_reply(kernel: &mut Kernel, call: Syscall) -> Reply {
    let name = call.name();
    match kernel.syscall(call) {
        Ok(reply) => reply,
        Err(fault) => panic!("{name} faulted: {fault}"),
    }
}

fn main() {
    let (switcher, resumes) = SimContextSwitch::new();
    let mut kernel = Kernel::new(Box::new(switcher));

    // Boot order matters: the idle task must claim pid 0.
    kernel
        .spawn("idle", EntryPoint(0x0), TargetQueue::Idle)
        .expect("spawn idle");
    let dispatcher = kernel
        .spawn("dispatcher", EntryPoint(0x1000), TargetQueue::Run)
        .expect("spawn dispatcher");
    let printer = kernel
        .spawn("printer", EntryPoint(0x2000), TargetQueue::Run)
        .expect("spawn printer");

    let first = kernel.start().expect("first dispatch");
    assert_eq!(first, dispatcher);
    println!("booted; {first} is active");

    // The dispatcher grabs a semaphore guarding the shared mailbox stream.
    let handle = match expect_reply(&mut kernel, Syscall::SemInit {
        handle: SemHandle::UNINITIALIZED,
    }) {
        Reply::Semaphore(handle) => handle,
        other => panic!("sem_init replied {other:?}"),
    };
    expect_reply(&mut kernel, Syscall::SemWait { handle });

    // Next tick hands the CPU to the printer, which blocks on the same
    // semaphore and then, once released, drains the mailbox.
    kernel.timer_tick().expect("tick");
    assert_eq!(kernel.active(), Some(printer));
    expect_reply(&mut kernel, Syscall::SemWait { handle });
    assert_eq!(kernel.active(), Some(dispatcher));

    let mbox = MboxId(0);
    for job in ["job-1", "job-2"] {
        expect_reply(&mut kernel, Syscall::MsgSend {
            mbox,
            payload: Message::pack(job.as_bytes()),
        });
    }
    expect_reply(&mut kernel, Syscall::SemPost { handle });

    // Let the rotation bring the printer back in.
    while kernel.active() != Some(printer) {
        kernel.timer_tick().expect("tick");
    }
    for _ in 0..2 {
        match expect_reply(&mut kernel, Syscall::MsgRecv { mbox }) {
            Reply::Message(message) => println!(
                "printer got {:?} from {} (sent t={}, received t={})",
                message.text(),
                message.sender,
                message.time_sent,
                message.time_received,
            ),
            other => panic!("msg_recv replied {other:?}"),
        }
    }

    // The printer naps for a second; the dispatcher keeps the CPU until
    // the wake pass readmits the printer.
    expect_reply(&mut kernel, Syscall::Sleep { seconds: 1 });
    let napped_at = kernel.now();
    while kernel.active() != Some(printer) {
        kernel.timer_tick().expect("tick");
    }
    println!(
        "printer woke after {} ticks at t={}",
        kernel.now().0 - napped_at.0,
        kernel.now()
    );

    match expect_reply(&mut kernel, Syscall::GetSysTime) {
        Reply::Time(seconds) => println!("system time: {seconds}s"),
        other => panic!("get_sys_time replied {other:?}"),
    }

    // Operator surface: a bogus exit request is reported and ignored, a
    // real one takes the dispatcher down.
    kernel.operator_exit(Pid(9)).expect("operator exit");
    kernel.operator_exit(dispatcher).expect("operator exit");
    assert!(kernel.process(dispatcher).is_some_and(|p| !p.in_use()));

    // The printer finishes up and exits; only idle is left.
    while kernel.active() != Some(printer) {
        kernel.timer_tick().expect("tick");
    }
    expect_reply(&mut kernel, Syscall::ProcExit);
    assert_eq!(kernel.active(), Some(Pid(0)));
    kernel.shutdown();

    println!("\n--- trace ({} resumes) ---", resumes.borrow().len());
    for event in kernel.tracer().events() {
        println!("{event}");
    }
    let summary = kernel.tracer().summary();
    println!("--- {} events by category ---", summary.total);
    for (category, count) in &summary.by_category {
        println!("{category:<7} {count}");
    }

    println!("\n--- final state ---");
    let json = serde_json::to_string_pretty(&kernel.snapshot()).expect("snapshot json");
    println!("{json}");
}
