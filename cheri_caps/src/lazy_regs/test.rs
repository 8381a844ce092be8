use assert_hex::assert_eq_hex;

use crate::{
    capability::Capability,
    format::{CapFormat, Cc128r, Cc64r},
    perms::{quadrant_code, ArchPerms},
};

use super::*;

#[test]
fn reset_state() -> Result<(), CapRegErr> {
    let regs = GpCapRegs::<Cc128r>::new();
    assert_eq!(regs.state(0)?, CapRegState::FullyDecompressed);
    for reg in 1..NUM_GP_CAP_REGS {
        assert_eq!(regs.state(reg)?, CapRegState::Integer);
        assert_eq_hex!(regs.pesbt(reg)?, Cc128r::NULL_PESBT);
        assert_eq_hex!(regs.cursor(reg)?, 0);
    }

    // 64r's null has a non-zero raw encoding
    let regs = GpCapRegs::<Cc64r>::new();
    assert_eq_hex!(regs.pesbt(1)?, 0x800);
    assert_eq_hex!(regs.pesbt(0)?, 0x800);
    Ok(())
}

#[test]
fn register_zero_ignores_writes() -> Result<(), CapRegErr> {
    let mut regs = GpCapRegs::<Cc128r>::new();
    regs.update(0, Capability::make_max_perms_cap(0, 0, Cc128r::MAX_TOP))?;
    regs.update_integer(0, 0x1234)?;
    regs.update_compressed(0, 0xdead_beef, 0x10, true)?;
    regs.nullify(0)?;
    assert_eq!(regs.get(0)?, Capability::null());
    assert_eq!(regs.state(0)?, CapRegState::FullyDecompressed);
    Ok(())
}

#[test]
fn integer_promotes_to_null_derived() -> Result<(), CapRegErr> {
    let mut regs = GpCapRegs::<Cc128r>::new();
    regs.update_integer(5, 0x1234)?;
    assert_eq!(regs.state(5)?, CapRegState::Integer);
    assert_eq_hex!(regs.cursor(5)?, 0x1234);

    let cap = regs.get(5)?;
    assert_eq!(regs.state(5)?, CapRegState::FullyDecompressed);
    assert!(!cap.tag());
    assert_eq_hex!(cap.base(), 0);
    assert_eq_hex!(cap.cursor(), 0x1234);
    assert_eq_hex!(cap.top_full(), Cc128r::MAX_TOP);
    assert_eq_hex!(regs.pesbt(5)?, Cc128r::NULL_PESBT);
    assert_eq!(cap, Capability::null_derived(0x1234));
    Ok(())
}

#[test]
fn integer_is_truncated_to_address_width() -> Result<(), CapRegErr> {
    let mut regs = GpCapRegs::<Cc64r>::new();
    regs.update_integer(1, 0x1_2345_6789)?;
    assert_eq_hex!(regs.cursor(1)?, 0x2345_6789);
    assert_eq_hex!(regs.get(1)?.cursor(), 0x2345_6789);
    Ok(())
}

#[test]
fn compressed_promotes_with_tag() -> Result<(), CapRegErr> {
    let mut regs = GpCapRegs::<Cc128r>::new();
    let cap = Capability::<Cc128r>::make_max_perms_cap(0x1000, 0x1800, 0x2000);

    regs.update_compressed(3, cap.compress_raw(), cap.cursor(), true)?;
    assert_eq!(regs.state(3)?, CapRegState::TaggedCap);
    assert_eq_hex!(regs.pesbt(3)?, cap.compress_raw());
    assert_eq_hex!(regs.cursor(3)?, 0x1800);
    assert_eq!(regs.get(3)?, cap);
    assert_eq!(regs.state(3)?, CapRegState::FullyDecompressed);

    regs.update_compressed(4, cap.compress_raw(), cap.cursor(), false)?;
    assert_eq!(regs.state(4)?, CapRegState::UntaggedCap);
    let untagged = regs.get(4)?;
    assert!(!untagged.tag());
    assert_eq_hex!((untagged.base(), untagged.top_full()), (0x1000, 0x2000));
    Ok(())
}

#[test]
fn update_compresses_eagerly() -> Result<(), CapRegErr> {
    let mut regs = GpCapRegs::<Cc64r>::new();
    let (cap, exact) = Capability::<Cc64r>::make_max_perms_cap(0, 0x100, Cc64r::MAX_TOP).set_bounds(0x100, 0x200);
    assert!(exact);

    regs.update(7, cap)?;
    assert_eq!(regs.state(7)?, CapRegState::FullyDecompressed);
    assert_eq_hex!(regs.pesbt(7)?, cap.compress_raw());
    assert_eq_hex!(regs.cursor(7)?, 0x100);
    assert_eq!(regs.get(7)?, cap);

    regs.nullify(7)?;
    assert_eq!(regs.get(7)?, Capability::null());
    assert_eq_hex!(regs.pesbt(7)?, Cc64r::NULL_PESBT);
    Ok(())
}

#[test]
fn decompressed_and_compressed_writes_agree() -> Result<(), CapRegErr> {
    let mut regs = GpCapRegs::<Cc128r>::new();
    let parent = Capability::<Cc128r>::make_max_perms_cap(0x10_0000, 0x10_0000, 0x20_0000);
    let (narrow, exact) = parent.set_bounds(0x1f_0000, 0x1f_0010);
    assert!(exact);

    regs.update(1, narrow)?;
    regs.update_compressed(2, regs.pesbt(1)?, regs.cursor(1)?, narrow.tag())?;
    let (c1, c2) = (regs.get(1)?, regs.get(2)?);
    assert_eq!(c1, c2);
    assert_eq_hex!((c2.base(), c2.top_full()), (c1.base(), c1.top_full()));
    Ok(())
}

#[test]
fn reset_forgets_everything() -> Result<(), CapRegErr> {
    let mut regs = GpCapRegs::<Cc128r>::new();
    regs.update(9, Capability::make_max_perms_cap(0, 0x40, Cc128r::MAX_TOP))?;
    regs.update_integer(10, 0x40)?;
    regs.reset();
    for reg in [9, 10] {
        assert_eq!(regs.state(reg)?, CapRegState::Integer);
        assert_eq!(regs.get(reg)?, Capability::null());
    }
    Ok(())
}

#[test]
fn out_of_range_registers() {
    let mut regs = GpCapRegs::<Cc128r>::new();
    assert_eq!(regs.get(NUM_GP_CAP_REGS), Err(CapRegErr::NoSuchRegister(NUM_GP_CAP_REGS)));
    assert_eq!(regs.pesbt(40), Err(CapRegErr::NoSuchRegister(40)));
    assert_eq!(regs.update_integer(33, 0), Err(CapRegErr::NoSuchRegister(33)));
    assert_eq!(regs.nullify(usize::MAX), Err(CapRegErr::NoSuchRegister(usize::MAX)));
}

#[test]
fn level_bits_select_perm_tables() -> Result<(), CapRegErr> {
    // Q2 index 1 is RC+LM with level bits and unused (everything) without
    let pesbt = Cc64r::AP.insert(Cc64r::NULL_PESBT, quadrant_code(2, 1) as u64);

    let mut regs = GpCapRegs::<Cc64r>::with_level_bits(true);
    regs.update_compressed(1, pesbt, 0, true)?;
    let cap = regs.get(1)?;
    assert_eq!(cap.arch_perms(), ArchPerms::R | ArchPerms::C | ArchPerms::LM);
    assert!(cap.level_bits());

    let mut regs = GpCapRegs::<Cc64r>::new();
    regs.update_compressed(1, pesbt, 0, true)?;
    assert_eq!(regs.get(1)?.arch_perms(), ArchPerms::ALL_NO_LVB);
    Ok(())
}

#[test]
fn special_regs_on_reset() {
    let scrs = SpecialCapRegs::<Cc128r>::new();
    for scr in ScrIndex::ALL {
        let cap = scrs.get(scr);
        if matches!(scr, ScrIndex::Pcc | ScrIndex::Ddc | ScrIndex::Mtcc | ScrIndex::Mepcc) {
            assert!(cap.tag(), "{} should be tagged", scr.name());
            assert_eq_hex!((cap.base(), cap.top_full()), (0, Cc128r::MAX_TOP));
            assert_eq!(cap.arch_perms(), ArchPerms::ALL_NO_LVB);
        } else {
            assert_eq!(*cap, Capability::null(), "{} should be null", scr.name());
        }
    }
}

#[test]
fn special_reg_numbers() {
    assert_eq!(ScrIndex::try_from(28u32), Ok(ScrIndex::Mtcc));
    assert_eq!(ScrIndex::try_from(1u32), Ok(ScrIndex::Ddc));
    assert_eq!(ScrIndex::try_from(2u32), Err(CapRegErr::NoSuchSpecialRegister(2)));
    for scr in ScrIndex::ALL {
        assert_eq!(ScrIndex::try_from(scr as u32), Ok(scr));
    }
}

#[test]
fn capreg_0_is_ddc() -> Result<(), CapRegErr> {
    let mut file = CapRegFile::<Cc64r>::new();
    assert_eq!(file.get_capreg_0_is_ddc(0)?, *file.ddc());
    assert!(file.get_capreg_0_is_ddc(0)?.tag());
    assert!(!file.gp.get(0)?.tag());

    let mut ddc = *file.ddc();
    ddc.set_cursor(0x8000);
    let (narrow, _) = ddc.set_bounds(0x8000, 0x9000);
    assert!(narrow.tag());
    file.scr.update(ScrIndex::Ddc, narrow);
    assert_eq!(file.get_capreg_0_is_ddc(0)?, narrow);

    file.gp.update_integer(2, 0x42)?;
    assert_eq!(file.get_capreg_0_is_ddc(2)?, Capability::null_derived(0x42));

    file.reset();
    assert_eq_hex!(file.ddc().base(), 0);
    assert_eq_hex!(file.pcc().top_full(), Cc64r::MAX_TOP);
    Ok(())
}
