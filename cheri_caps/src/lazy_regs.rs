//! A capability register file that keeps registers compressed until they are read.
//!
//! Every general-purpose register always has an up to date pesbt/cursor pair, which is what
//! generated code and state snapshots look at. The decompressed view is only filled in when the
//! register is read through [GpCapRegs::get].

#[cfg(feature = "std")]
use thiserror::Error;

use crate::{capability::Capability, format::CapFormat, util::mask64};

pub const NUM_GP_CAP_REGS: usize = 32;
pub const NUM_SPECIAL_CAP_REGS: usize = 10;

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
#[cfg_attr(feature = "std", derive(Error))]
pub enum CapRegErr {
    #[cfg_attr(feature = "std", error("There is no general-purpose capability register {0}"))]
    NoSuchRegister(usize),
    #[cfg_attr(feature = "std", error("There is no special capability register {0}"))]
    NoSuchSpecialRegister(u32),
}

/// How much of a register is known.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapRegState {
    /// Only the cursor is meaningful and the pesbt is the null encoding.
    Integer,
    /// The decompressed view is in sync with pesbt and cursor.
    FullyDecompressed,
    /// pesbt and cursor hold a tagged capability that hasn't been decompressed yet.
    TaggedCap,
    /// pesbt and cursor hold an untagged capability that hasn't been decompressed yet.
    UntaggedCap,
}

#[derive(Debug, Clone, Copy)]
enum Cached<F: CapFormat> {
    Integer,
    TaggedCap,
    UntaggedCap,
    FullyDecompressed(Capability<F>),
}

#[derive(Debug, Clone, Copy)]
struct CapReg<F: CapFormat> {
    /// Raw (register form) pesbt
    pesbt: u64,
    cursor: u64,
    cached: Cached<F>,
}

impl<F: CapFormat> CapReg<F> {
    fn integer(value: u64) -> Self {
        Self {
            pesbt: F::NULL_PESBT,
            cursor: value & F::MAX_ADDR,
            cached: Cached::Integer,
        }
    }

    fn compressed(pesbt: u64, cursor: u64, tag: bool) -> Self {
        Self {
            pesbt: pesbt & mask64(F::CAP_BITS / 2),
            cursor: cursor & F::MAX_ADDR,
            cached: if tag { Cached::TaggedCap } else { Cached::UntaggedCap },
        }
    }

    fn decompressed(cap: Capability<F>) -> Self {
        let reg = Self {
            pesbt: cap.compress_raw(),
            cursor: cap.cursor(),
            cached: Cached::FullyDecompressed(cap),
        };
        reg.sanity_check();
        reg
    }

    fn state(&self) -> CapRegState {
        match self.cached {
            Cached::Integer => CapRegState::Integer,
            Cached::TaggedCap => CapRegState::TaggedCap,
            Cached::UntaggedCap => CapRegState::UntaggedCap,
            Cached::FullyDecompressed(_) => CapRegState::FullyDecompressed,
        }
    }

    fn sanity_check(&self) {
        if let Cached::FullyDecompressed(cap) = &self.cached {
            debug_assert_eq!(cap.compress_raw(), self.pesbt, "compressed and decompressed views out of sync: {cap}");
            debug_assert_eq!(cap.cursor(), self.cursor, "cursor out of sync: {cap}");
        }
    }

    /// Fill in the decompressed view if needed.
    fn promote(&mut self, level_bits: bool) -> Capability<F> {
        let cap = match self.cached {
            Cached::FullyDecompressed(cap) => return cap,
            Cached::Integer => {
                self.pesbt = F::NULL_PESBT;
                Capability::null_derived(self.cursor)
            }
            Cached::TaggedCap => Capability::decompress_raw_lvb(self.pesbt, self.cursor, true, level_bits),
            Cached::UntaggedCap => Capability::decompress_raw_lvb(self.pesbt, self.cursor, false, level_bits),
        };
        self.cached = Cached::FullyDecompressed(cap);
        self.sanity_check();
        cap
    }
}

/// The general-purpose capability registers. Register 0 is the null capability and ignores writes.
#[derive(Debug, Clone)]
pub struct GpCapRegs<F: CapFormat> {
    regs: [CapReg<F>; NUM_GP_CAP_REGS],
    level_bits: bool,
}

impl<F: CapFormat> GpCapRegs<F> {
    pub fn new() -> Self {
        Self::with_level_bits(false)
    }

    /// A register file whose compressed registers decompress with the level-bits permission tables.
    pub fn with_level_bits(level_bits: bool) -> Self {
        let mut regs = Self {
            regs: [CapReg::integer(0); NUM_GP_CAP_REGS],
            level_bits,
        };
        regs.reset();
        regs
    }

    /// Every register becomes the integer 0, except register 0 which is the decompressed null capability.
    pub fn reset(&mut self) {
        self.regs = [CapReg::integer(0); NUM_GP_CAP_REGS];
        self.regs[0] = CapReg::decompressed(Capability::null());
        log::trace!("{} capability registers reset", F::NAME);
    }

    fn reg(&self, reg: usize) -> Result<&CapReg<F>, CapRegErr> {
        self.regs.get(reg).ok_or(CapRegErr::NoSuchRegister(reg))
    }

    /// Look up a register for writing. Returns `None` for register 0.
    fn writable_reg(&mut self, reg: usize) -> Result<Option<&mut CapReg<F>>, CapRegErr> {
        let slot = self.regs.get_mut(reg).ok_or(CapRegErr::NoSuchRegister(reg))?;
        Ok(if reg == 0 { None } else { Some(slot) })
    }

    /// Read a register, decompressing it if needed.
    pub fn get(&mut self, reg: usize) -> Result<Capability<F>, CapRegErr> {
        let level_bits = self.level_bits;
        let slot = self.regs.get_mut(reg).ok_or(CapRegErr::NoSuchRegister(reg))?;
        let from = slot.state();
        let cap = slot.promote(level_bits);
        if from != CapRegState::FullyDecompressed {
            log::trace!("c{reg}: {from:?} -> FullyDecompressed ({cap})");
        }
        Ok(cap)
    }

    /// The raw pesbt, without decompressing.
    pub fn pesbt(&self, reg: usize) -> Result<u64, CapRegErr> {
        Ok(self.reg(reg)?.pesbt)
    }

    pub fn cursor(&self, reg: usize) -> Result<u64, CapRegErr> {
        Ok(self.reg(reg)?.cursor)
    }

    pub fn state(&self, reg: usize) -> Result<CapRegState, CapRegErr> {
        Ok(self.reg(reg)?.state())
    }

    /// Write a decompressed capability. The compressed form is updated straight away.
    pub fn update(&mut self, reg: usize, cap: Capability<F>) -> Result<(), CapRegErr> {
        if let Some(slot) = self.writable_reg(reg)? {
            *slot = CapReg::decompressed(cap);
            log::trace!("c{reg} <- {cap}");
        }
        Ok(())
    }

    /// Write an integer. Reading it back gives an untagged capability with the null bounds.
    pub fn update_integer(&mut self, reg: usize, value: u64) -> Result<(), CapRegErr> {
        if let Some(slot) = self.writable_reg(reg)? {
            *slot = CapReg::integer(value);
            log::trace!("c{reg} <- integer {value:#x}");
        }
        Ok(())
    }

    /// Write a raw pesbt and cursor, deferring decompression to the next read.
    pub fn update_compressed(&mut self, reg: usize, pesbt: u64, cursor: u64, tag: bool) -> Result<(), CapRegErr> {
        if let Some(slot) = self.writable_reg(reg)? {
            *slot = CapReg::compressed(pesbt, cursor, tag);
            log::trace!("c{reg} <- pesbt {pesbt:#018x} cursor {cursor:#x} tag {tag}");
        }
        Ok(())
    }

    pub fn nullify(&mut self, reg: usize) -> Result<(), CapRegErr> {
        if let Some(slot) = self.writable_reg(reg)? {
            *slot = CapReg::decompressed(Capability::null());
            log::trace!("c{reg} <- null");
        }
        Ok(())
    }
}

impl<F: CapFormat> Default for GpCapRegs<F> {
    fn default() -> Self {
        Self::new()
    }
}

/// Special capability register numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum ScrIndex {
    Pcc = 0,
    Ddc = 1,
    Stcc = 12,
    Stdc = 13,
    SScratchC = 14,
    Sepcc = 15,
    Mtcc = 28,
    Mtdc = 29,
    MScratchC = 30,
    Mepcc = 31,
}

impl ScrIndex {
    pub const ALL: [ScrIndex; NUM_SPECIAL_CAP_REGS] = [
        ScrIndex::Pcc,
        ScrIndex::Ddc,
        ScrIndex::Stcc,
        ScrIndex::Stdc,
        ScrIndex::SScratchC,
        ScrIndex::Sepcc,
        ScrIndex::Mtcc,
        ScrIndex::Mtdc,
        ScrIndex::MScratchC,
        ScrIndex::Mepcc,
    ];

    const fn slot(self) -> usize {
        match self {
            ScrIndex::Pcc => 0,
            ScrIndex::Ddc => 1,
            ScrIndex::Stcc => 2,
            ScrIndex::Stdc => 3,
            ScrIndex::SScratchC => 4,
            ScrIndex::Sepcc => 5,
            ScrIndex::Mtcc => 6,
            ScrIndex::Mtdc => 7,
            ScrIndex::MScratchC => 8,
            ScrIndex::Mepcc => 9,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            ScrIndex::Pcc => "PCC",
            ScrIndex::Ddc => "DDC",
            ScrIndex::Stcc => "STCC",
            ScrIndex::Stdc => "STDC",
            ScrIndex::SScratchC => "SScratchC",
            ScrIndex::Sepcc => "SEPCC",
            ScrIndex::Mtcc => "MTCC",
            ScrIndex::Mtdc => "MTDC",
            ScrIndex::MScratchC => "MScratchC",
            ScrIndex::Mepcc => "MEPCC",
        }
    }

    /// Registers that start out with every permission over the whole address space.
    const fn is_root_on_reset(self) -> bool {
        matches!(self, ScrIndex::Pcc | ScrIndex::Ddc | ScrIndex::Mtcc | ScrIndex::Mepcc)
    }
}

impl TryFrom<u32> for ScrIndex {
    type Error = CapRegErr;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        ScrIndex::ALL
            .into_iter()
            .find(|scr| *scr as u32 == value)
            .ok_or(CapRegErr::NoSuchSpecialRegister(value))
    }
}

/// The special capability registers, which are always kept decompressed.
#[derive(Debug, Clone)]
pub struct SpecialCapRegs<F: CapFormat> {
    regs: [Capability<F>; NUM_SPECIAL_CAP_REGS],
    level_bits: bool,
}

impl<F: CapFormat> SpecialCapRegs<F> {
    pub fn new() -> Self {
        Self::with_level_bits(false)
    }

    pub fn with_level_bits(level_bits: bool) -> Self {
        let mut regs = Self {
            regs: [Capability::null(); NUM_SPECIAL_CAP_REGS],
            level_bits,
        };
        regs.reset();
        regs
    }

    pub fn reset(&mut self) {
        for scr in ScrIndex::ALL {
            self.regs[scr.slot()] = if scr.is_root_on_reset() {
                Capability::make_max_perms_cap_m_lvb(0, 0, F::MAX_TOP, false, self.level_bits)
            } else {
                Capability::null()
            };
        }
        log::trace!("{} special capability registers reset", F::NAME);
    }

    pub fn get(&self, scr: ScrIndex) -> &Capability<F> {
        &self.regs[scr.slot()]
    }

    pub fn update(&mut self, scr: ScrIndex, cap: Capability<F>) {
        log::trace!("{} <- {cap}", scr.name());
        self.regs[scr.slot()] = cap;
    }
}

impl<F: CapFormat> Default for SpecialCapRegs<F> {
    fn default() -> Self {
        Self::new()
    }
}

/// The general-purpose and special capability registers of one hart.
#[derive(Debug, Clone, Default)]
pub struct CapRegFile<F: CapFormat> {
    pub gp: GpCapRegs<F>,
    pub scr: SpecialCapRegs<F>,
}

impl<F: CapFormat> CapRegFile<F> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_level_bits(level_bits: bool) -> Self {
        Self {
            gp: GpCapRegs::with_level_bits(level_bits),
            scr: SpecialCapRegs::with_level_bits(level_bits),
        }
    }

    pub fn reset(&mut self) {
        self.gp.reset();
        self.scr.reset();
    }

    pub fn ddc(&self) -> &Capability<F> {
        self.scr.get(ScrIndex::Ddc)
    }

    pub fn pcc(&self) -> &Capability<F> {
        self.scr.get(ScrIndex::Pcc)
    }

    /// Read a general-purpose register, with register 0 meaning DDC instead of null.
    /// Loads, stores and pointer conversions address memory relative to DDC this way.
    pub fn get_capreg_0_is_ddc(&mut self, reg: usize) -> Result<Capability<F>, CapRegErr> {
        if reg == 0 {
            return Ok(*self.ddc());
        }
        self.gp.get(reg)
    }
}

#[cfg(test)]
mod test;
