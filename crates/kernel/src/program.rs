//! Starting user programs.

use std::sync::Arc;

use log::{debug, info};
use vm::{AddressSpace, PageFlags, VirtualAddress};

use crate::{
    Errno, Kernel, Pid, TrapFrame, UserMode,
    thread::{curthread, thread_fork},
    user::{WORD_SIZE, usermode},
};

/// A loadable segment of a program image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub vaddr: VirtualAddress,
    /// Size in memory; bytes past `data` are zero.
    pub memsz: usize,
    pub data: Vec<u8>,
    pub flags: PageFlags,
}

/// An in-memory executable: up to two segments and an entry point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramImage {
    pub name: String,
    pub entrypoint: VirtualAddress,
    pub segments: Vec<Segment>,
}

impl ProgramImage {
    pub fn new(name: impl Into<String>, entrypoint: VirtualAddress) -> Self {
        Self {
            name: name.into(),
            entrypoint,
            segments: Vec::new(),
        }
    }

    pub fn with_segment(
        mut self,
        vaddr: VirtualAddress,
        memsz: usize,
        data: impl Into<Vec<u8>>,
        flags: PageFlags,
    ) -> Self {
        self.segments.push(Segment {
            vaddr,
            memsz,
            data: data.into(),
            flags,
        });
        self
    }

    /// Builds an address space holding this image.
    pub fn load(&self, kernel: &Kernel) -> Result<AddressSpace, Errno> {
        let mut aspace = AddressSpace::create(kernel.coremap());
        for segment in &self.segments {
            if segment.data.len() > segment.memsz {
                return Err(Errno::EINVAL);
            }
            aspace.define_region(segment.vaddr, segment.memsz, segment.flags)?;
        }
        aspace.prepare_load()?;
        for segment in &self.segments {
            aspace.copyout(segment.vaddr, &segment.data)?;
        }
        aspace.complete_load()?;
        Ok(aspace)
    }
}

/// Copies `args` onto the user stack below `stackptr`.
///
/// Lays out the strings, then a null-terminated array of pointers to them.
/// Returns the new stack pointer, which is also the address of that array.
fn push_args(aspace: &AddressSpace, mut stackptr: u32, args: &[String]) -> Result<u32, Errno> {
    let mut argv = vec![0u32; args.len() + 1];
    for (i, arg) in args.iter().enumerate().rev() {
        let mut bytes = arg.as_bytes().to_vec();
        bytes.push(0);
        stackptr = stackptr.checked_sub(bytes.len() as u32).ok_or(Errno::ENOMEM)?;
        aspace.copyout(VirtualAddress::new(stackptr), &bytes)?;
        argv[i] = stackptr;
    }
    stackptr -= stackptr % WORD_SIZE as u32;

    let table: Vec<u8> = argv.iter().flat_map(|p| p.to_be_bytes()).collect();
    stackptr = stackptr.checked_sub(table.len() as u32).ok_or(Errno::ENOMEM)?;
    aspace.copyout(VirtualAddress::new(stackptr), &table)?;
    Ok(stackptr)
}

impl Kernel {
    /// Loads `image` into a new process and runs `program` in it.
    ///
    /// The new process is a child of the caller. Loading errors are reported
    /// here; once the process runs, its fate is reported through `waitpid`.
    pub fn run_program(
        self: &Arc<Self>,
        image: &ProgramImage,
        args: &[&str],
        program: Arc<dyn UserMode>,
    ) -> Result<Pid, Errno> {
        let mut aspace = image.load(self)?;
        let stackptr = aspace.define_stack()?;

        let mut argv: Vec<String> = Vec::with_capacity(args.len() + 1);
        argv.push(image.name.clone());
        argv.extend(args.iter().map(|a| (*a).to_owned()));
        let stackptr = push_args(&aspace, stackptr.as_u32(), &argv)?;

        let tf = TrapFrame::for_entry(
            argv.len() as u32,
            stackptr,
            stackptr,
            image.entrypoint.as_u32(),
        );

        let pid = thread_fork(self, &image.name, move |kernel| {
            let Some(me) = curthread() else {
                unreachable!("program started without a thread");
            };
            me.set_program(Arc::clone(&program));
            me.install_vmspace(aspace);
            me.with_vmspace(|aspace| aspace.activate());
            usermode(kernel, program, tf)
        })?;

        info!("started {} as pid {pid}", image.name);
        debug!("{} entry {} sp {stackptr:#010x}", image.name, image.entrypoint);
        Ok(pid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::KernelConfig;

    const CODE: VirtualAddress = VirtualAddress::new(0x0040_0000);
    const DATA: VirtualAddress = VirtualAddress::new(0x1000_0000);

    fn kernel() -> Arc<Kernel> {
        Kernel::boot(KernelConfig::default()).unwrap()
    }

    #[test]
    fn load_copies_segment_data() {
        let kernel = kernel();
        let image = ProgramImage::new("hello", CODE)
            .with_segment(CODE, 16, *b"\x27\xbd\xff\xe8", PageFlags::READ | PageFlags::EXECUTE)
            .with_segment(DATA, 64, b"greetings".to_vec(), PageFlags::RW);

        let aspace = image.load(&kernel).unwrap();
        let mut buf = [0u8; 9];
        aspace.copyin(DATA, &mut buf).unwrap();
        assert_eq!(&buf, b"greetings");
        aspace.copyin(DATA + 9, &mut buf).unwrap();
        assert_eq!(buf, [0; 9]);
        assert_eq!(aspace.heap_start(), DATA + 4096);
    }

    #[test]
    fn oversized_segment_data_is_rejected() {
        let kernel = kernel();
        let image = ProgramImage::new("bad", CODE).with_segment(CODE, 2, *b"abc", PageFlags::RWX);
        assert_eq!(image.load(&kernel).err(), Some(Errno::EINVAL));
    }

    #[test]
    fn three_segments_are_unimplemented() {
        let kernel = kernel();
        let image = ProgramImage::new("fat", CODE)
            .with_segment(CODE, 1, Vec::new(), PageFlags::RWX)
            .with_segment(DATA, 1, Vec::new(), PageFlags::RW)
            .with_segment(VirtualAddress::new(0x2000_0000), 1, Vec::new(), PageFlags::RW);
        assert_eq!(image.load(&kernel).err(), Some(Errno::EUNIMP));
    }

    #[test]
    fn arguments_are_laid_out_on_the_stack() {
        let kernel = kernel();
        let image = ProgramImage::new("args", CODE).with_segment(CODE, 1, Vec::new(), PageFlags::RWX);
        let mut aspace = image.load(&kernel).unwrap();
        let top = aspace.define_stack().unwrap();

        let args = ["args".to_owned(), "-v".to_owned()];
        let sp = push_args(&aspace, top.as_u32(), &args).unwrap();
        assert_eq!(sp % WORD_SIZE as u32, 0);

        let mut table = [0u8; 12];
        aspace.copyin(VirtualAddress::new(sp), &mut table).unwrap();
        let words: Vec<u32> = table
            .chunks(4)
            .map(|w| u32::from_be_bytes([w[0], w[1], w[2], w[3]]))
            .collect();
        assert_eq!(words[2], 0);

        let mut arg = [0u8; 3];
        aspace.copyin(VirtualAddress::new(words[1]), &mut arg).unwrap();
        assert_eq!(&arg, b"-v\0");
        let mut name = [0u8; 5];
        aspace.copyin(VirtualAddress::new(words[0]), &mut name).unwrap();
        assert_eq!(&name, b"args\0");
    }
}
