use core::{
    arch::{asm, naked_asm},
    ptr::{addr_of_mut, write_volatile},
    sync::atomic::{AtomicPtr, Ordering},
};

use cortex_m::peripheral::{scb::VectActive, SCB};
use critical_section::CriticalSection;

use super::Arch;
use crate::{Arguable, Kernel, ThreadId};

/// Callee-save registers r4-r11.
pub(crate) type ThreadData = [usize; 8];
pub(crate) const DEFAULT_THREAD_DATA: ThreadData = [0; 8];

/// The kernel the exception handlers operate on, set by [`start_threading()`].
static KERNEL: AtomicPtr<Kernel> = AtomicPtr::new(core::ptr::null_mut());

/// Register save area for the context that was running before the first
/// thread started.
static mut STARTUP_REGS: ThreadData = DEFAULT_THREAD_DATA;

pub(crate) struct State;

impl State {
    pub const fn new() -> Self {
        Self
    }
}

/// Entry point and `r0` value of a new thread.
pub(crate) struct ThreadEntry {
    func: usize,
    arg: usize,
}

impl ThreadEntry {
    pub fn new<T: Arguable>(func: fn(T), arg: T) -> Self {
        Self {
            func: func as usize,
            arg: arg.into_arg(),
        }
    }

    pub fn noarg(func: fn()) -> Self {
        Self {
            func: func as usize,
            arg: 0,
        }
    }
}

/// Entered when a thread function returns.
extern "C" fn cleanup() -> ! {
    // SAFETY: threads only run after `start_threading()` stored the kernel,
    // which is `'static`.
    let kernel = unsafe { &*KERNEL.load(Ordering::Acquire) };
    kernel.thread_exit();
    unreachable!("exited thread was scheduled again");
}

pub(crate) struct Cpu;

impl Arch for Cpu {
    /// The exact order in which Cortex-M pushes the registers to the stack when
    /// entering the ISR is:
    ///
    /// +---------+ <- sp
    /// |   r0    |
    /// |   r1    |
    /// |   r2    |
    /// |   r3    |
    /// |   r12   |
    /// |   LR    |
    /// |   PC    |
    /// |   PSR   |
    /// +---------+
    fn setup_thread(
        _kernel: &'static Kernel,
        _pid: ThreadId,
        stack: &'static mut [u8],
        entry: ThreadEntry,
    ) -> usize {
        let stack_start = stack.as_ptr() as usize;

        // 1. The stack starts at the highest address and grows downwards.
        // 2. A full stored context also contains R4-R11 and the stack pointer,
        //    thus an additional 36 bytes need to be reserved.
        // 3. Cortex-M expects the SP to be 8 byte aligned, so we chop the lowest
        //    7 bits by doing `& 0xFFFFFFF8`.
        let stack_pos = ((stack_start + stack.len() - 36) & 0xFFFFFFF8) as *mut usize;

        // SAFETY: `stack_pos` lies within `stack`, which is exclusively ours.
        unsafe {
            write_volatile(stack_pos.offset(0), entry.arg); // -> R0
            write_volatile(stack_pos.offset(1), 1); // -> R1
            write_volatile(stack_pos.offset(2), 2); // -> R2
            write_volatile(stack_pos.offset(3), 3); // -> R3
            write_volatile(stack_pos.offset(4), 12); // -> R12
            write_volatile(stack_pos.offset(5), cleanup as usize); // -> LR
            write_volatile(stack_pos.offset(6), entry.func); // -> PC
            write_volatile(stack_pos.offset(7), 0x01000000); // -> APSR
        }

        stack_pos as usize
    }

    /// Triggers a PendSV exception.
    ///
    /// PendSV has the lowest priority and interrupts are masked during
    /// critical sections, so the switch happens when they end.
    #[inline(always)]
    fn schedule(_kernel: &Kernel) {
        SCB::set_pendsv();
        cortex_m::asm::isb();
    }

    #[inline(always)]
    fn cs_enter() {}

    #[inline(always)]
    fn cs_exit(_kernel: &Kernel) {}

    fn is_thread_context(_kernel: &Kernel) -> bool {
        SCB::vect_active() == VectActive::ThreadMode
    }
}

/// Starts the first thread.
///
/// # Safety
///
/// May only be called once, from the reset handler while MSP is active.
pub(crate) unsafe fn start_threading(kernel: &'static Kernel) {
    KERNEL.store(kernel as *const Kernel as *mut Kernel, Ordering::Release);
    let Some(next_sp) = kernel.with_cs(|cs| {
        kernel
            .scheduler
            .with_cs(cs, |scheduler| scheduler.next_sp())
    }) else {
        panic!("no thread to start");
    };
    cortex_m::interrupt::disable();
    Cpu::schedule(kernel);
    // SAFETY: switches to PSP with the first thread's prepared stack, PendSV
    // then restores its context.
    unsafe {
        asm!(
            "
            msr psp, r1 // set new thread's SP to PSP
            cpsie i     // enable interrupts, otherwise svc hard faults
            svc 0       // SVC 0 handles switching
            ",
        in("r1")next_sp);
    }
}

#[cfg(target_feature = "thumb2")]
#[unsafe(naked)]
#[unsafe(no_mangle)]
#[allow(non_snake_case)]
unsafe extern "C" fn SVCall() {
    naked_asm!(
        "
            movw LR, #0xFFFd
            movt LR, #0xFFFF
            bx lr
            ",
    );
}

#[cfg(not(target_feature = "thumb2"))]
#[unsafe(naked)]
#[unsafe(no_mangle)]
#[allow(non_snake_case)]
unsafe extern "C" fn SVCall() {
    naked_asm!(
        "
            /* label rules:
             * - number only
             * - no combination of *only* [01]
             * - add f or b for 'next matching forward/backward'
             * so let's use '99' forward ('99f')
             */
            ldr r0, 99f
            mov LR, r0
            bx lr

            .align 4
            99:
            .word 0xFFFFFFFD
            ",
    );
}

#[cfg(target_feature = "thumb2")]
#[unsafe(naked)]
#[unsafe(no_mangle)]
#[allow(non_snake_case)]
unsafe extern "C" fn PendSV() {
    naked_asm!(
        "
            mrs r0, psp
            cpsid i
            bl {sched}
            cpsie i
            cmp r0, #0
            beq 99f
            stmia r1, {{r4-r11}}
            ldmia r2, {{r4-r11}}
            msr.n psp, r0
            99:
            movw LR, #0xFFFd
            movt LR, #0xFFFF
            bx LR
            ",
        sched = sym sched,
    );
}

#[cfg(not(target_feature = "thumb2"))]
#[unsafe(naked)]
#[unsafe(no_mangle)]
#[allow(non_snake_case)]
unsafe extern "C" fn PendSV() {
    naked_asm!(
        "
            mrs r0, psp
            cpsid i
            bl {sched}
            cpsie i
            cmp r0, #0
            beq 99f

            //stmia r1!, {{r4-r7}}
            str r4, [r1, #16]
            str r5, [r1, #20]
            str r6, [r1, #24]
            str r7, [r1, #28]

            mov  r4, r8
            mov  r5, r9
            mov  r6, r10
            mov  r7, r11

            str r4, [r1, #0]
            str r5, [r1, #4]
            str r6, [r1, #8]
            str r7, [r1, #12]

            //
            ldmia r2!, {{r4-r7}}
            mov r11, r7
            mov r10, r6
            mov r9,  r5
            mov r8,  r4
            ldmia r2!, {{r4-r7}}

            msr.n psp, r0
            99:
            ldr r0, 999f
            mov LR, r0
            bx lr

            .align 4
            999:
            .word 0xFFFFFFFD
            ",
        sched = sym sched,
    );
}

/// Schedules the next thread.
///
/// It selects the next thread that should run from the runqueue.
/// This may be current thread, or a new one. Without a runnable thread it
/// sleeps until an interrupt makes one runnable.
///
/// Input:
/// - old_sp (`r0`): the stack pointer of the currently running thread.
///
/// Returns:
/// - `0` in `r0` if the next thread in the runqueue is the currently running thread
/// - Else it writes into the following registers:
///   - `r1`: pointer to the register save area of the old thread
///   - `r2`: pointer to the register save area of the new thread
///   - `r0`: stack-pointer for new thread
///
/// This function is called in PendSV, with interrupts disabled.
unsafe extern "C" fn sched(old_sp: usize) -> usize {
    // SAFETY: PendSV only runs after `start_threading()`.
    let kernel = unsafe { &*KERNEL.load(Ordering::Acquire) };
    // SAFETY: interrupts are disabled.
    let cs = unsafe { CriticalSection::new() };

    // SAFETY (all scheduler accesses): no other code runs while interrupts are
    // disabled, and the reference is re-derived after they were enabled.
    let prev = {
        let scheduler = unsafe { &mut *kernel.scheduler.as_ptr(cs) };
        let prev = scheduler.current_pid();
        if let Some(prev) = prev {
            scheduler.get_unchecked_mut(prev).sp = old_sp;
        }
        prev
    };

    let next = loop {
        if let Some(next) = unsafe { &mut *kernel.scheduler.as_ptr(cs) }.sched() {
            break next;
        }
        cortex_m::asm::wfi();
        // SAFETY: pending interrupts get to run their ISRs, which may make a
        // thread runnable. No scheduler reference is held meanwhile.
        unsafe { cortex_m::interrupt::enable() };
        cortex_m::asm::isb();
        cortex_m::interrupt::disable();
    };

    if prev == Some(next) {
        return 0;
    }

    let scheduler = unsafe { &mut *kernel.scheduler.as_ptr(cs) };
    let prev_high_regs = match prev {
        Some(prev) => scheduler.get_unchecked_mut(prev).data.as_mut_ptr(),
        // Nothing to restore later, the registers go to scratch space.
        None => unsafe { addr_of_mut!(STARTUP_REGS) }.cast::<usize>(),
    };
    let next_thread = scheduler.get_unchecked_mut(next);
    let next_sp = next_thread.sp;
    let next_high_regs = next_thread.data.as_mut_ptr();

    // PendSV expects these three pointers in r0, r1 and r2:
    // r1 = &prev.data
    // r2 = &next.data
    // r0 = next.sp (implicitly done here via return value)
    //
    // write to registers manually, as ABI would return the values via stack
    unsafe { asm!("", in("r1") prev_high_regs, in("r2") next_high_regs) };

    next_sp
}
