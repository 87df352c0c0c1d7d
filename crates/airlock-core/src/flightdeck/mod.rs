//! Flight deck: scout injection.
//!
//! Given an attached, stopped tracee, assemble an injectable shellcode
//! block around the loader blob and run it in the tracee:
//!
//! ```text
//! [trap stub][so path][prog headers][init array + 0][rela + (0,0)][loader]
//! ```
//!
//! The trap stub calls the loader entry (whose address sits in the
//! stub's last 8 bytes) and executes `int3` on return, so the
//! supervisor observes a `SIGTRAP` with the loader's return value in
//! `rax`.

pub mod elf;

use std::ffi::CString;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

use nix::unistd::Pid;

use crate::error::{CoreError, Result};
use crate::loader;
use crate::ptrace;

/// `nop; nop; call [rip+8]; int3`, padding, then the entry pointer in
/// the last 8 bytes. Execution starts at the `call` (offset 2).
const TRAP_STUB: [u8; 24] = [
    0x90, 0x90, // nop nop
    0xff, 0x15, 0x08, 0x00, 0x00, 0x00, // call [rip + 8]  -> entry slot
    0xcc, // int3
    0x90, 0x90, 0x90, 0x90, 0x90, 0x90, 0x90, // pad to the entry slot
    0, 0, 0, 0, 0, 0, 0, 0, // entry pointer, patched at assembly
];

const ENTRY_SLOT: usize = TRAP_STUB.len() - 8;

/// Offset within the stub where execution starts (skips the two nops).
const STUB_ENTRY_SKIP: u64 = 2;

/// Stack and scratch slack appended to the injected mapping.
const REGION_SLACK: usize = 16384;

const fn round8(v: usize) -> usize {
    (v + 7) & !7
}

/// Assembled injectable block plus the offsets the register setup needs.
struct Shellcode {
    bytes: Vec<u8>,
    so_path: usize,
    headers: usize,
    header_num: usize,
    init_array: usize,
    rela: usize,
    loader_off: usize,
    entry_rel: usize,
}

fn prepare_shellcode(so_path: &Path, flags: u64) -> Result<Shellcode> {
    let raw = std::fs::read(so_path).map_err(|source| CoreError::ScoutObject {
        path: so_path.to_path_buf(),
        source,
    })?;
    let image = elf::ElfImage::parse(raw)?;

    let segments = image.load_segments();
    if segments.is_empty() {
        return Err(CoreError::BadElf {
            reason: "no PT_LOAD segments".into(),
        });
    }

    let mut init_array = image.init_array()?;
    init_array.push(0);

    let mut relas = image.relocations()?;
    // Smuggle the caller's flags through the relocation pass: the cell
    // ends up holding `&global_flags + flags`, and the constructor
    // subtracts its own address to recover them.
    let flags_sym = image.find_symbol("global_flags")?;
    relas.push(elf::FlatRela {
        offset: flags_sym.value,
        addend: flags_sym.value.wrapping_add(flags),
    });
    relas.push(elf::FlatRela {
        offset: 0,
        addend: 0,
    });

    let path_c = CString::new(so_path.as_os_str().as_bytes()).map_err(|_| {
        CoreError::ScoutObject {
            path: so_path.to_path_buf(),
            source: std::io::Error::other("path contains a nul byte"),
        }
    })?;
    let path_bytes = path_c.as_bytes_with_nul();

    let loader_bytes = loader::loader_bytes();

    let mut pos = round8(TRAP_STUB.len());
    let so_path_off = pos;
    pos = round8(pos + path_bytes.len());
    let headers_off = pos;
    pos = round8(pos + segments.len() * std::mem::size_of::<loader::ProgHeader>());
    let init_off = pos;
    pos = round8(pos + init_array.len() * 8);
    let rela_off = pos;
    pos = round8(pos + relas.len() * 16);
    let loader_off = pos;
    let total = round8(pos + loader_bytes.len());

    let mut bytes = vec![0u8; total];
    bytes[..TRAP_STUB.len()].copy_from_slice(&TRAP_STUB);
    bytes[so_path_off..so_path_off + path_bytes.len()].copy_from_slice(path_bytes);
    for (i, seg) in segments.iter().enumerate() {
        let p = headers_off + i * 32;
        bytes[p..p + 8].copy_from_slice(&seg.offset.to_le_bytes());
        bytes[p + 8..p + 16].copy_from_slice(&seg.addr.to_le_bytes());
        bytes[p + 16..p + 24].copy_from_slice(&seg.file_size.to_le_bytes());
        bytes[p + 24..p + 32].copy_from_slice(&seg.mem_size.to_le_bytes());
    }
    for (i, v) in init_array.iter().enumerate() {
        let p = init_off + i * 8;
        bytes[p..p + 8].copy_from_slice(&v.to_le_bytes());
    }
    for (i, r) in relas.iter().enumerate() {
        let p = rela_off + i * 16;
        bytes[p..p + 8].copy_from_slice(&r.offset.to_le_bytes());
        bytes[p + 8..p + 16].copy_from_slice(&r.addend.to_le_bytes());
    }
    bytes[loader_off..loader_off + loader_bytes.len()].copy_from_slice(loader_bytes);

    Ok(Shellcode {
        bytes,
        so_path: so_path_off,
        headers: headers_off,
        header_num: segments.len(),
        init_array: init_off,
        rela: rela_off,
        loader_off,
        entry_rel: loader::loader_entry_offset(),
    })
}

/// Injects the scout shared object into an attached, stopped tracee.
///
/// Maps an anonymous RWX region in the tracee, places the shellcode
/// there with the entry pointer patched to the loader's final address,
/// runs it through the trap stub, and restores the tracee's registers.
///
/// # Errors
///
/// Returns an error if the scout object cannot be parsed, any ptrace
/// step fails, or the loader reports a failure.
pub fn scout_takeoff(pid: Pid, so_path: &Path, flags: u64) -> Result<()> {
    let mut shellcode = prepare_shellcode(so_path, flags)?;
    tracing::debug!(
        pid = pid.as_raw(),
        bytes = shellcode.bytes.len(),
        flags,
        "injecting scout"
    );

    let saved = ptrace::get_regs(pid)?;

    let request = (shellcode.bytes.len() + REGION_SLACK + 4095) & !4095;
    let addr = ptrace::inject_mmap(
        pid,
        0,
        request as u64,
        libc::PROT_READ | libc::PROT_WRITE | libc::PROT_EXEC,
        libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
        -1,
        0,
        Some(&saved),
    )?;

    // The block's final address is known now; patch the entry pointer.
    let entry = addr + (shellcode.loader_off + shellcode.entry_rel) as u64;
    shellcode.bytes[ENTRY_SLOT..ENTRY_SLOT + 8].copy_from_slice(&entry.to_le_bytes());

    let mut template = saved;
    template.rip = addr + STUB_ENTRY_SKIP;
    template.rsp = addr + request as u64;
    template.rbp = template.rsp;

    let ret = ptrace::inject_run_funcall_nosave(
        pid,
        &shellcode.bytes,
        addr,
        [
            addr + shellcode.so_path as u64,
            addr + shellcode.headers as u64,
            shellcode.header_num as u64,
            addr + shellcode.init_array as u64,
            addr + shellcode.rela as u64,
            flags,
        ],
        &template,
        &saved,
    )?;
    if ret != 0 {
        return Err(CoreError::LoaderFailed { ret });
    }
    tracing::debug!(pid = pid.as_raw(), region = %format_args!("{addr:#x}"), "scout injected");
    Ok(())
}
