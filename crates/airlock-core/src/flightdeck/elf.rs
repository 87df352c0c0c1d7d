//! Minimal ELF64 reader for the scout shared object.
//!
//! Parses exactly what the injection needs: program headers, section
//! headers, `.dynsym`/`.dynstr`, the `PT_DYNAMIC` array, and the
//! relocation/init-array tables it points at. Works on an owned byte
//! buffer so tests can feed synthetic images.

use crate::error::{CoreError, Result};
use crate::loader::ProgHeader;

/// `PT_LOAD` program header type.
pub const PT_LOAD: u32 = 1;
/// `PT_DYNAMIC` program header type.
pub const PT_DYNAMIC: u32 = 2;

/// `SHT_DYNSYM` section type.
const SHT_DYNSYM: u32 = 11;

const DT_RELA: i64 = 7;
const DT_RELASZ: i64 = 8;
const DT_RELAENT: i64 = 9;
const DT_INIT_ARRAY: i64 = 25;
const DT_INIT_ARRAYSZ: i64 = 27;

/// `R_X86_64_64`: absolute 64-bit, `S + A`.
pub const R_X86_64_64: u32 = 1;
/// `R_X86_64_GLOB_DAT`: GOT entry, `S`.
pub const R_X86_64_GLOB_DAT: u32 = 6;
/// `R_X86_64_RELATIVE`: `B + A`.
pub const R_X86_64_RELATIVE: u32 = 8;

const EHDR_SIZE: usize = 64;
const PHDR_SIZE: usize = 56;
const SHDR_SIZE: usize = 64;
const SYM_SIZE: usize = 24;
const RELA_SIZE: usize = 24;
const DYN_SIZE: usize = 16;

/// Bounds-checked little-endian reader over a byte buffer.
///
/// Every pointer walk through the image goes through a cursor carrying
/// its base and remaining length, so a malformed object surfaces as an
/// error instead of an out-of-bounds read.
pub struct ByteCursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> ByteCursor<'a> {
    /// Cursor at `offset` within `bytes`.
    ///
    /// # Errors
    ///
    /// Returns an error if `offset` is outside the buffer.
    pub fn at(bytes: &'a [u8], offset: usize) -> Result<Self> {
        if offset > bytes.len() {
            return Err(CoreError::BadElf {
                reason: format!("offset {offset} outside {}-byte image", bytes.len()),
            });
        }
        Ok(Self { bytes, pos: offset })
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self.pos.checked_add(n).ok_or_else(|| CoreError::BadElf {
            reason: "offset overflow".into(),
        })?;
        if end > self.bytes.len() {
            return Err(CoreError::BadElf {
                reason: format!("read of {n} bytes at {} past image end", self.pos),
            });
        }
        let out = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    /// Reads a `u16`.
    pub fn u16(&mut self) -> Result<u16> {
        let mut le = [0u8; 2];
        le.copy_from_slice(self.take(2)?);
        Ok(u16::from_le_bytes(le))
    }

    /// Reads a `u32`.
    pub fn u32(&mut self) -> Result<u32> {
        let mut le = [0u8; 4];
        le.copy_from_slice(self.take(4)?);
        Ok(u32::from_le_bytes(le))
    }

    /// Reads a `u64`.
    pub fn u64(&mut self) -> Result<u64> {
        let mut le = [0u8; 8];
        le.copy_from_slice(self.take(8)?);
        Ok(u64::from_le_bytes(le))
    }

    /// Reads an `i64`.
    pub fn i64(&mut self) -> Result<i64> {
        let mut le = [0u8; 8];
        le.copy_from_slice(self.take(8)?);
        Ok(i64::from_le_bytes(le))
    }

    /// Skips `n` bytes.
    pub fn skip(&mut self, n: usize) -> Result<()> {
        let _ = self.take(n)?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
struct Phdr {
    p_type: u32,
    offset: u64,
    vaddr: u64,
    filesz: u64,
    memsz: u64,
}

#[derive(Debug, Clone, Copy)]
struct Shdr {
    sh_type: u32,
    offset: u64,
    size: u64,
    link: u32,
    entsize: u64,
}

/// One `.dynsym` entry the flight deck cares about.
#[derive(Debug, Clone, Copy)]
pub struct DynSym {
    /// Offset of the name in `.dynstr`.
    name_off: u32,
    /// Symbol value (vaddr for defined symbols).
    pub value: u64,
}

/// One relocation, already resolved to `(offset, addend)` form for the
/// loader's uniform `*(base + offset) = base + addend` pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlatRela {
    /// Target offset within the loaded image.
    pub offset: u64,
    /// Resolved addend.
    pub addend: u64,
}

/// Parsed scout shared object.
pub struct ElfImage {
    bytes: Vec<u8>,
    phdrs: Vec<Phdr>,
    shdrs: Vec<Shdr>,
    dynamic: Vec<(i64, u64)>,
}

impl ElfImage {
    /// Parses an ELF64 shared object.
    ///
    /// # Errors
    ///
    /// Returns an error on structural problems (bad magic, truncated
    /// tables, missing `PT_DYNAMIC`).
    pub fn parse(bytes: Vec<u8>) -> Result<Self> {
        if bytes.len() < EHDR_SIZE || &bytes[..4] != b"\x7fELF" {
            return Err(CoreError::BadElf {
                reason: "not an ELF image".into(),
            });
        }
        if bytes[4] != 2 || bytes[5] != 1 {
            return Err(CoreError::BadElf {
                reason: "not a little-endian ELF64 image".into(),
            });
        }

        let mut c = ByteCursor::at(&bytes, 32)?;
        let phoff = c.u64()?;
        let shoff = c.u64()?;
        c.skip(4)?; // e_flags
        c.skip(2)?; // e_ehsize
        let phentsize = c.u16()?;
        let phnum = c.u16()?;
        let shentsize = c.u16()?;
        let shnum = c.u16()?;
        let _shstrndx = c.u16()?;

        if usize::from(phentsize) != PHDR_SIZE || usize::from(shentsize) != SHDR_SIZE {
            return Err(CoreError::BadElf {
                reason: "unexpected header entry sizes".into(),
            });
        }

        let mut phdrs = Vec::with_capacity(usize::from(phnum));
        for i in 0..usize::from(phnum) {
            let mut c = ByteCursor::at(&bytes, phoff as usize + i * PHDR_SIZE)?;
            let p_type = c.u32()?;
            c.skip(4)?; // p_flags
            let offset = c.u64()?;
            let vaddr = c.u64()?;
            c.skip(8)?; // p_paddr
            let filesz = c.u64()?;
            let memsz = c.u64()?;
            phdrs.push(Phdr {
                p_type,
                offset,
                vaddr,
                filesz,
                memsz,
            });
        }

        let mut shdrs = Vec::with_capacity(usize::from(shnum));
        for i in 0..usize::from(shnum) {
            let mut c = ByteCursor::at(&bytes, shoff as usize + i * SHDR_SIZE)?;
            c.skip(4)?; // sh_name
            let sh_type = c.u32()?;
            c.skip(8)?; // sh_flags
            c.skip(8)?; // sh_addr
            let offset = c.u64()?;
            let size = c.u64()?;
            let link = c.u32()?;
            c.skip(4)?; // sh_info
            c.skip(8)?; // sh_addralign
            let entsize = c.u64()?;
            shdrs.push(Shdr {
                sh_type,
                offset,
                size,
                link,
                entsize,
            });
        }

        let mut dynamic = Vec::new();
        if let Some(dyn_ph) = phdrs.iter().find(|p| p.p_type == PT_DYNAMIC) {
            let count = dyn_ph.filesz as usize / DYN_SIZE;
            for i in 0..count {
                let mut c = ByteCursor::at(&bytes, dyn_ph.offset as usize + i * DYN_SIZE)?;
                let tag = c.i64()?;
                let val = c.u64()?;
                if tag == 0 {
                    break;
                }
                dynamic.push((tag, val));
            }
        } else {
            return Err(CoreError::BadElf {
                reason: "no PT_DYNAMIC segment".into(),
            });
        }

        Ok(Self {
            bytes,
            phdrs,
            shdrs,
            dynamic,
        })
    }

    /// Flat table of every `PT_LOAD` segment.
    #[must_use]
    pub fn load_segments(&self) -> Vec<ProgHeader> {
        self.phdrs
            .iter()
            .filter(|p| p.p_type == PT_LOAD)
            .map(|p| ProgHeader {
                offset: p.offset,
                addr: p.vaddr,
                file_size: p.filesz,
                mem_size: p.memsz,
            })
            .collect()
    }

    fn dynamic_val(&self, tag: i64) -> Option<u64> {
        self.dynamic.iter().find(|(t, _)| *t == tag).map(|(_, v)| *v)
    }

    /// Maps a virtual address to its file offset through the `PT_LOAD`
    /// table.
    fn vaddr_to_offset(&self, vaddr: u64) -> Result<u64> {
        self.phdrs
            .iter()
            .filter(|p| p.p_type == PT_LOAD)
            .find(|p| p.vaddr <= vaddr && vaddr < p.vaddr + p.memsz)
            .map(|p| p.offset + (vaddr - p.vaddr))
            .ok_or_else(|| CoreError::BadElf {
                reason: format!("vaddr {vaddr:#x} not covered by any PT_LOAD"),
            })
    }

    /// `DT_INIT_ARRAY` contents as function offsets, without terminator.
    ///
    /// # Errors
    ///
    /// Returns an error if the table lies outside the image.
    pub fn init_array(&self) -> Result<Vec<u64>> {
        let (Some(vaddr), Some(bytes)) = (
            self.dynamic_val(DT_INIT_ARRAY),
            self.dynamic_val(DT_INIT_ARRAYSZ),
        ) else {
            return Ok(Vec::new());
        };
        let off = self.vaddr_to_offset(vaddr)?;
        let count = bytes as usize / 8;
        let mut c = ByteCursor::at(&self.bytes, off as usize)?;
        let mut out = Vec::with_capacity(count);
        for _ in 0..count {
            out.push(c.u64()?);
        }
        Ok(out)
    }

    /// `DT_RELA` table resolved to `(offset, addend)` pairs.
    ///
    /// `R_X86_64_RELATIVE` uses its addend directly; `R_X86_64_GLOB_DAT`
    /// and `R_X86_64_64` resolve through `.dynsym` (the scout object is
    /// self-contained, so every symbol value is local).
    ///
    /// # Errors
    ///
    /// Returns an error on unknown relocation types or a malformed
    /// table.
    pub fn relocations(&self) -> Result<Vec<FlatRela>> {
        let Some(rela_vaddr) = self.dynamic_val(DT_RELA) else {
            return Ok(Vec::new());
        };
        let relasz = self.dynamic_val(DT_RELASZ).unwrap_or(0);
        let relaent = self.dynamic_val(DT_RELAENT).unwrap_or(RELA_SIZE as u64);
        if relaent != RELA_SIZE as u64 || relasz % relaent != 0 {
            return Err(CoreError::BadElf {
                reason: "malformed DT_RELA table".into(),
            });
        }

        let syms = self.dynsyms()?;
        let off = self.vaddr_to_offset(rela_vaddr)?;
        let count = (relasz / relaent) as usize;
        let mut out = Vec::with_capacity(count);
        for i in 0..count {
            let mut c = ByteCursor::at(&self.bytes, off as usize + i * RELA_SIZE)?;
            let r_offset = c.u64()?;
            let r_info = c.u64()?;
            let r_addend = c.i64()?;
            let r_type = (r_info & 0xffff_ffff) as u32;
            let r_sym = (r_info >> 32) as usize;
            let addend = match r_type {
                R_X86_64_RELATIVE => r_addend as u64,
                R_X86_64_GLOB_DAT => self.sym_value(&syms, r_sym)?,
                R_X86_64_64 => self.sym_value(&syms, r_sym)?.wrapping_add(r_addend as u64),
                other => {
                    return Err(CoreError::BadElf {
                        reason: format!("unsupported relocation type {other}"),
                    });
                }
            };
            out.push(FlatRela {
                offset: r_offset,
                addend,
            });
        }
        Ok(out)
    }

    fn sym_value(&self, syms: &[DynSym], index: usize) -> Result<u64> {
        syms.get(index).map(|s| s.value).ok_or_else(|| CoreError::BadElf {
            reason: format!("relocation names symbol {index} outside .dynsym"),
        })
    }

    fn dynsyms(&self) -> Result<Vec<DynSym>> {
        let Some(sh) = self.shdrs.iter().find(|s| s.sh_type == SHT_DYNSYM) else {
            return Ok(Vec::new());
        };
        if sh.entsize != SYM_SIZE as u64 {
            return Err(CoreError::BadElf {
                reason: "unexpected .dynsym entry size".into(),
            });
        }
        let count = (sh.size / sh.entsize) as usize;
        let mut out = Vec::with_capacity(count);
        for i in 0..count {
            let mut c = ByteCursor::at(&self.bytes, sh.offset as usize + i * SYM_SIZE)?;
            let name_off = c.u32()?;
            c.skip(4)?; // st_info, st_other, st_shndx
            let value = c.u64()?;
            out.push(DynSym { name_off, value });
        }
        Ok(out)
    }

    /// Looks up an exported symbol by name through `.dynsym`/`.dynstr`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::MissingSymbol`] when the name is absent.
    pub fn find_symbol(&self, name: &'static str) -> Result<DynSym> {
        let dynsym_sh = self
            .shdrs
            .iter()
            .find(|s| s.sh_type == SHT_DYNSYM)
            .ok_or(CoreError::MissingSymbol { name })?;
        let strtab = self
            .shdrs
            .get(dynsym_sh.link as usize)
            .ok_or(CoreError::MissingSymbol { name })?;

        for sym in self.dynsyms()? {
            let start = strtab.offset as usize + sym.name_off as usize;
            let Some(rest) = self.bytes.get(start..) else {
                continue;
            };
            let Some(nul) = rest.iter().position(|&b| b == 0) else {
                continue;
            };
            if &rest[..nul] == name.as_bytes() {
                return Ok(sym);
            }
        }
        Err(CoreError::MissingSymbol { name })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Builds a minimal synthetic ELF64 shared object:
    /// one PT_LOAD at (0, 0), one PT_DYNAMIC, a .dynsym with one
    /// exported symbol, a RELA table, and an init array.
    fn synthetic_so() -> Vec<u8> {
        let mut img = vec![0u8; 4096];
        img[..4].copy_from_slice(b"\x7fELF");
        img[4] = 2; // ELFCLASS64
        img[5] = 1; // little-endian

        let phoff = 64usize;
        let shoff = 2048usize;
        let phnum = 2u16;
        let shnum = 3u16;

        img[32..40].copy_from_slice(&(phoff as u64).to_le_bytes());
        img[40..48].copy_from_slice(&(shoff as u64).to_le_bytes());
        img[54..56].copy_from_slice(&56u16.to_le_bytes()); // e_phentsize
        img[56..58].copy_from_slice(&phnum.to_le_bytes());
        img[58..60].copy_from_slice(&64u16.to_le_bytes()); // e_shentsize
        img[60..62].copy_from_slice(&shnum.to_le_bytes());

        // PT_LOAD covering the whole file at vaddr 0.
        let p = phoff;
        img[p..p + 4].copy_from_slice(&1u32.to_le_bytes());
        img[p + 8..p + 16].copy_from_slice(&0u64.to_le_bytes()); // offset
        img[p + 16..p + 24].copy_from_slice(&0u64.to_le_bytes()); // vaddr
        img[p + 32..p + 40].copy_from_slice(&4096u64.to_le_bytes()); // filesz
        img[p + 40..p + 48].copy_from_slice(&4096u64.to_le_bytes()); // memsz

        // PT_DYNAMIC at file offset 1024.
        let dyn_off = 1024usize;
        let p = phoff + 56;
        img[p..p + 4].copy_from_slice(&2u32.to_le_bytes());
        img[p + 8..p + 16].copy_from_slice(&(dyn_off as u64).to_le_bytes());
        img[p + 16..p + 24].copy_from_slice(&(dyn_off as u64).to_le_bytes());
        img[p + 32..p + 40].copy_from_slice(&(16u64 * 6).to_le_bytes()); // filesz

        // Dynamic entries: RELA @1280 (2 entries), INIT_ARRAY @1472 (1).
        let entries: [(i64, u64); 6] = [
            (DT_RELA, 1280),
            (DT_RELASZ, 48),
            (DT_RELAENT, 24),
            (DT_INIT_ARRAY, 1472),
            (DT_INIT_ARRAYSZ, 8),
            (0, 0),
        ];
        for (i, (tag, val)) in entries.iter().enumerate() {
            let p = dyn_off + i * 16;
            img[p..p + 8].copy_from_slice(&tag.to_le_bytes());
            img[p + 8..p + 16].copy_from_slice(&val.to_le_bytes());
        }

        // RELA: one RELATIVE and one GLOB_DAT against symbol 1.
        let p = 1280usize;
        img[p..p + 8].copy_from_slice(&0x100u64.to_le_bytes());
        img[p + 8..p + 16].copy_from_slice(&(u64::from(R_X86_64_RELATIVE)).to_le_bytes());
        img[p + 16..p + 24].copy_from_slice(&0x200i64.to_le_bytes());
        img[p + 24..p + 32].copy_from_slice(&0x300u64.to_le_bytes());
        let info = (1u64 << 32) | u64::from(R_X86_64_GLOB_DAT);
        img[p + 32..p + 40].copy_from_slice(&info.to_le_bytes());
        img[p + 40..p + 48].copy_from_slice(&0i64.to_le_bytes());

        // Init array: one ctor at 0x500.
        img[1472..1480].copy_from_slice(&0x500u64.to_le_bytes());

        // Sections: null, .dynsym (2 syms @1536), .dynstr (@1728).
        let s = shoff + 64; // .dynsym
        img[s + 4..s + 8].copy_from_slice(&11u32.to_le_bytes()); // SHT_DYNSYM
        img[s + 24..s + 32].copy_from_slice(&1536u64.to_le_bytes()); // offset
        img[s + 32..s + 40].copy_from_slice(&48u64.to_le_bytes()); // size
        img[s + 40..s + 44].copy_from_slice(&2u32.to_le_bytes()); // link -> .dynstr
        img[s + 56..s + 64].copy_from_slice(&24u64.to_le_bytes()); // entsize
        let s = shoff + 128; // .dynstr
        img[s + 4..s + 8].copy_from_slice(&3u32.to_le_bytes()); // SHT_STRTAB
        img[s + 24..s + 32].copy_from_slice(&1728u64.to_le_bytes());
        img[s + 32..s + 40].copy_from_slice(&32u64.to_le_bytes());

        // Symbol 1: global_flags at 0x700.
        let p = 1536 + 24;
        img[p..p + 4].copy_from_slice(&1u32.to_le_bytes()); // name offset
        img[p + 8..p + 16].copy_from_slice(&0x700u64.to_le_bytes());

        // .dynstr: "\0global_flags\0".
        img[1728] = 0;
        img[1729..1729 + 12].copy_from_slice(b"global_flags");
        img[1741] = 0;

        img
    }

    #[test]
    fn parses_load_segments() {
        let elf = ElfImage::parse(synthetic_so()).expect("parse");
        let segs = elf.load_segments();
        assert_eq!(segs.len(), 1);
        assert_eq!(segs[0].offset, 0);
        assert_eq!(segs[0].addr, 0);
        assert_eq!(segs[0].mem_size, 4096);
    }

    #[test]
    fn resolves_relocations_through_dynsym() {
        let elf = ElfImage::parse(synthetic_so()).expect("parse");
        let relas = elf.relocations().expect("relocations");
        assert_eq!(
            relas,
            vec![
                FlatRela {
                    offset: 0x100,
                    addend: 0x200
                },
                FlatRela {
                    offset: 0x300,
                    addend: 0x700
                },
            ]
        );
    }

    #[test]
    fn reads_init_array() {
        let elf = ElfImage::parse(synthetic_so()).expect("parse");
        assert_eq!(elf.init_array().expect("init_array"), vec![0x500]);
    }

    #[test]
    fn finds_exported_symbols_by_name() {
        let elf = ElfImage::parse(synthetic_so()).expect("parse");
        let sym = elf.find_symbol("global_flags").expect("symbol");
        assert_eq!(sym.value, 0x700);
        assert!(matches!(
            elf.find_symbol("nonexistent_symbol"),
            Err(CoreError::MissingSymbol { .. })
        ));
    }

    #[test]
    fn rejects_non_elf_input() {
        assert!(ElfImage::parse(vec![0u8; 16]).is_err());
        assert!(ElfImage::parse(b"MZ not an elf".to_vec()).is_err());
    }

    #[test]
    fn cursor_rejects_out_of_bounds_reads() {
        let bytes = [0u8; 8];
        let mut c = ByteCursor::at(&bytes, 4).expect("cursor");
        assert!(c.u32().is_ok());
        assert!(c.u32().is_err());
    }
}
