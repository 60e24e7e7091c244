use std::process::ExitCode;
use std::sync::Arc;

use cinder_kernel::{
    Errno, KERNEL_PID, Kernel, KernelConfig, MAX_NUM_PROCS, Pid, ProgramImage, User,
    console::Console,
};
use clap::Parser;
use log::{LevelFilter, error, info, warn};
use vm::{HumanSize, PAGE_SIZE, PageFlags, VirtualAddress};

const ENTRY: VirtualAddress = VirtualAddress::new(0x0040_0000);
const DATA: VirtualAddress = VirtualAddress::new(0x1000_0000);

#[derive(Parser)]
#[command(name = "cinder")]
#[command(about = "Boot the Cinder kernel core on a simulated machine and run a fork/wait workload")]
struct Args {
    /// Physical RAM in KiB
    #[arg(long, default_value_t = 8192)]
    ram_kib: usize,

    /// Pages stolen for early kernel data before the coremap starts
    #[arg(long, default_value_t = 8)]
    boot_pages: usize,

    /// Number of child processes the workload forks
    #[arg(short, long, default_value_t = 4)]
    children: usize,

    /// Bytes each child adds to its heap with sbrk
    #[arg(long, default_value_t = 8192)]
    heap_bytes: u32,

    /// Maximum log level (off, error, warn, info, debug, trace)
    #[arg(short, long, default_value_t = LevelFilter::Info)]
    log_level: LevelFilter,
}

/// Child half of the workload: grow the heap, fill it and check it reads back.
fn child_work(user: &mut User, heap_bytes: i32) -> Result<(), Errno> {
    let pid = user.getpid();
    let base = user.sbrk(heap_bytes)?;
    let pattern: Vec<u8> = (0..heap_bytes).map(|i| (i as u8) ^ (pid as u8)).collect();
    user.copyout(base, &pattern)?;

    let mut readback = vec![0u8; pattern.len()];
    user.copyin(base, &mut readback)?;
    if readback != pattern || user.sbrk(0)? != base + heap_bytes as usize {
        return Err(Errno::EFAULT);
    }
    Ok(())
}

/// Forks `children` processes, waits for each and checks their exit codes.
fn forktest(user: &mut User) {
    if user.pc() != ENTRY.as_u32() {
        // Resumed after fork in a child.
        let heap_bytes = user.load_word(DATA + 4).unwrap_or(0) as i32;
        let pid = user.getpid();
        match child_work(user, heap_bytes) {
            Ok(()) => user.exit(pid),
            Err(err) => user.exit(-(err.code() as i32)),
        }
    }

    let args = user.args().unwrap_or_default();
    let parsed = (
        args.get(1).and_then(|a| a.parse::<usize>().ok()),
        args.get(2).and_then(|a| a.parse::<u32>().ok()),
    );
    let (Some(children), Some(heap_bytes)) = parsed else {
        user.exit(2);
    };
    if user.store_word(DATA + 4, heap_bytes).is_err() {
        user.exit(3);
    }

    let mut pids: Vec<Pid> = Vec::with_capacity(children);
    for _ in 0..children {
        match user.fork() {
            Ok(pid) => pids.push(pid),
            Err(err) => {
                warn!("forktest: fork failed: {err}");
                break;
            }
        }
    }

    let mut failures = children - pids.len();
    for pid in pids {
        let ok = user.waitpid(pid, DATA, 0).is_ok() && user.load_word(DATA) == Ok(pid as u32);
        if !ok {
            warn!("forktest: child {pid} did not report its pid");
            failures += 1;
        }
    }
    user.exit(failures as i32)
}

fn main() -> ExitCode {
    let args = Args::parse();
    Console::init(args.log_level);

    if args.children >= MAX_NUM_PROCS {
        error!(
            "at most {} children fit in the process table",
            MAX_NUM_PROCS - 1
        );
        return ExitCode::from(2);
    }

    let config = KernelConfig {
        ram_size: args.ram_kib * 1024 / PAGE_SIZE * PAGE_SIZE,
        boot_pages: args.boot_pages,
        ..KernelConfig::default()
    };
    let kernel = match Kernel::boot(config) {
        Ok(kernel) => kernel,
        Err(err) => {
            error!("boot failed: {err}");
            return ExitCode::FAILURE;
        }
    };

    let image = ProgramImage::new("forktest", ENTRY)
        .with_segment(ENTRY, PAGE_SIZE, vec![0u8; 64], PageFlags::READ | PageFlags::EXECUTE)
        .with_segment(DATA, PAGE_SIZE, Vec::new(), PageFlags::RW);
    let children = args.children.to_string();
    let heap_bytes = args.heap_bytes.to_string();

    let started = kernel.run_program(
        &image,
        &[children.as_str(), heap_bytes.as_str()],
        Arc::new(forktest),
    );
    let pid = match started {
        Ok(pid) => pid,
        Err(err) => {
            error!("cannot start forktest: {err}");
            return ExitCode::FAILURE;
        }
    };

    let mut status = 0;
    if let Err(err) = kernel
        .processes()
        .waitpid(KERNEL_PID, pid, Some(&mut status), 0)
    {
        error!("waitpid on forktest failed: {err}");
        return ExitCode::FAILURE;
    }

    info!(
        "forktest exited with {status}, {} free",
        HumanSize::pages(kernel.coremap().free_frames())
    );
    if status == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
