//! GICv3 system register CPU interface
//!
//! Everything here runs on the calling core and only touches its own
//! `ICC_*` registers and redistributor frame.

use super::helpers::{rdistif_mark_core_asleep, rdistif_mark_core_awake};
use super::regs::{sgir_value, IccSre, GICV3_MAX_SGI_TARGETS};
use super::Gicv3Driver;
use crate::arch::arm64::mpidr::afflvl;
use crate::arch::arm64::sysreg::{igrpen1_el3, scr_el3, SysReg, SysRegs, IGRPEN0_ENABLE};
use crate::arch::barrier::{dsbishst, isb};
use crate::config::InterruptGroup;
use crate::drivers::irqchip::common::{
    INT_ID_MASK, MIN_PPI_ID, PENDING_G1NS_INTID, PENDING_G1S_INTID,
};
use crate::drivers::irqchip::mmio::Mmio;
use crate::drivers::irqchip::regs::GIC_PRI_MASK;

/// IRM value selecting the affinity target list in ICC_SGI*R
const SGIR_IRM_TO_AFF: u64 = 0;

impl<'a, M: Mmio, S: SysRegs> Gicv3Driver<'a, M, S> {
    /// Enable the CPU interface of core `proc`
    ///
    /// Wakes the redistributor, enables system register access at every
    /// exception level (transiently switching to Non-secure to reach the
    /// banked ICC_SRE_EL1), then signals Group 0 and Group 1 Secure
    /// interrupts.
    pub fn cpuif_enable(&self, proc: usize) {
        let sysregs = &self.sysregs;

        rdistif_mark_core_awake(self.gicr(proc));

        // Legacy bypass off; lower ELs may program their own SRE
        let sre = IccSre::DIB | IccSre::DFB | IccSre::EN | IccSre::SRE;
        sysregs.write(SysReg::IccSreEl3, sysregs.read(SysReg::IccSreEl3) | sre.bits());

        let scr = sysregs.read(SysReg::ScrEl3);

        sysregs.write(SysReg::ScrEl3, scr | scr_el3::NS);
        isb();

        sysregs.write(SysReg::IccSreEl2, sysregs.read(SysReg::IccSreEl2) | sre.bits());
        sysregs.write(SysReg::IccSreEl1, IccSre::SRE.bits());
        isb();

        sysregs.write(SysReg::ScrEl3, scr & !scr_el3::NS);
        isb();

        sysregs.write(SysReg::IccPmrEl1, GIC_PRI_MASK.into());
        sysregs.write(SysReg::IccIgrpen0El1, IGRPEN0_ENABLE);
        sysregs.write(
            SysReg::IccIgrpen1El3,
            sysregs.read(SysReg::IccIgrpen1El3) | igrpen1_el3::ENABLE_G1S,
        );

        // Secure ICC_SRE_EL1
        sysregs.write(SysReg::IccSreEl1, IccSre::SRE.bits());
        isb();
    }

    /// Disable the CPU interface of core `proc` and put its redistributor
    /// to sleep
    pub fn cpuif_disable(&self, proc: usize) {
        let sysregs = &self.sysregs;

        sysregs.write(
            SysReg::IccSreEl3,
            sysregs.read(SysReg::IccSreEl3) | (IccSre::DIB | IccSre::DFB).bits(),
        );
        sysregs.write(
            SysReg::IccIgrpen0El1,
            sysregs.read(SysReg::IccIgrpen0El1) & !IGRPEN0_ENABLE,
        );
        sysregs.write(
            SysReg::IccIgrpen1El3,
            sysregs.read(SysReg::IccIgrpen1El3)
                & !(igrpen1_el3::ENABLE_G1NS | igrpen1_el3::ENABLE_G1S),
        );
        isb();

        rdistif_mark_core_asleep(self.gicr(proc));
    }

    /// Id of the highest priority pending interrupt, resolving the Group 1
    /// sentinels to the real id
    pub fn get_pending_interrupt_id(&self) -> u32 {
        let id = self.sysregs.read(SysReg::IccHppir0El1) as u32 & INT_ID_MASK;
        if id == PENDING_G1S_INTID || id == PENDING_G1NS_INTID {
            return self.sysregs.read(SysReg::IccHppir1El1) as u32 & INT_ID_MASK;
        }
        id
    }

    /// Raw ICC_HPPIR0_EL1 id: a Group 0 id, one of the Group 1 sentinels,
    /// or spurious
    pub fn get_pending_interrupt_type(&self) -> u32 {
        self.sysregs.read(SysReg::IccHppir0El1) as u32 & INT_ID_MASK
    }

    /// ICC_RPR_EL1
    pub fn get_running_priority(&self) -> u32 {
        self.sysregs.read(SysReg::IccRprEl1) as u32
    }

    /// Acknowledge the highest priority pending Group 0 interrupt
    pub fn acknowledge_interrupt(&self) -> u32 {
        self.sysregs.read(SysReg::IccIar0El1) as u32
    }

    /// Signal end of Group 0 interrupt `id`
    pub fn end_of_interrupt(&self, id: u32) {
        // The peripheral's deassertion write must complete before the GIC
        // sees the EOI
        dsbishst();
        self.sysregs.write(SysReg::IccEoir0El1, id.into());
    }

    /// Acknowledge the highest priority pending Group 1 interrupt
    pub fn acknowledge_interrupt_g1(&self) -> u32 {
        self.sysregs.read(SysReg::IccIar1El1) as u32
    }

    /// Signal end of Group 1 interrupt `id`
    pub fn end_of_interrupt_g1(&self, id: u32) {
        dsbishst();
        self.sysregs.write(SysReg::IccEoir1El1, id.into());
    }

    /// Program the priority mask, returning the previous one
    pub fn set_pmr(&self, mask: u32) -> u32 {
        let old = self.sysregs.read(SysReg::IccPmrEl1) as u32;
        // PMR writes are self-synchronising; only memory ordering is needed
        dsbishst();
        self.sysregs.write(SysReg::IccPmrEl1, mask.into());
        old
    }

    /// Raise SGI `sgi` in `group` on the PE `target`
    ///
    /// Group 1 Secure SGIs are generated for the current (Secure) state,
    /// Group 1 Non-secure ones through the alias register.
    pub fn raise_sgi(&self, sgi: u32, group: InterruptGroup, target: u64) {
        assert!(sgi < MIN_PPI_ID, "GICv3: {} is not an SGI", sgi);

        let aff0 = afflvl(target, 0);
        assert!(
            aff0 < GICV3_MAX_SGI_TARGETS,
            "GICv3: SGI target {:#x} not addressable",
            target
        );
        let value = sgir_value(
            afflvl(target, 3),
            afflvl(target, 2),
            afflvl(target, 1),
            sgi,
            SGIR_IRM_TO_AFF,
            1 << aff0,
        );

        // Shared updates the SGI handler depends on must be observed first
        dsbishst();
        let reg = match group {
            InterruptGroup::Group0 => SysReg::IccSgi0rEl1,
            InterruptGroup::Group1Secure => SysReg::IccSgi1rEl1,
            InterruptGroup::Group1NonSecure => SysReg::IccAsgi1rEl1,
        };
        self.sysregs.write(reg, value);
        isb();
    }

    /// Raise secure Group 0 SGI `sgi` on the PE `target`
    pub fn raise_secure_g0_sgi(&self, sgi: u32, target: u64) {
        self.raise_sgi(sgi, InterruptGroup::Group0, target);
    }
}
