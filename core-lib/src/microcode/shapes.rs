//! Instruction shapes.
//!
//! Each builder XORs the lines for one kind of instruction onto the phase
//! defaults, once per flags slot. Operand-bearing instructions start from
//! [`operand`], which lays down the addressing-mode skeleton. Almost all of
//! them finish with the program counter trailer ([`Slot::load_next`]).

use super::lines::{ControlWord as L, Phase};
use super::opcode::{flag, AddressMode, Matrix, OpCode, FLAG_SLOTS};

/// Mutable view of one flags slot of an opcode under construction.
pub(crate) struct Slot<'a> {
    oc: &'a mut OpCode,
    flags: u8,
}

impl Slot<'_> {
    fn xor(&mut self, step: usize, phase: Phase, lines: L) -> &mut Self {
        self.oc.lines[self.flags as usize][step][phase.index()] ^= lines;
        self
    }

    fn phi1(&mut self, step: usize, lines: L) -> &mut Self {
        self.xor(step, Phase::Phi1, lines)
    }

    fn phi2(&mut self, step: usize, lines: L) -> &mut Self {
        self.xor(step, Phase::Phi2, lines)
    }

    const fn carry(&self) -> bool {
        self.flags & flag::C != 0
    }

    const fn last(&self) -> usize {
        self.oc.last_step()
    }

    /// Step that completes an indexed read when the low-byte add did not carry.
    fn short_path(&self) -> Option<usize> {
        if self.carry() || !self.oc.page_cross {
            return None;
        }
        Some(if self.oc.addr_mode == AddressMode::Izy { 4 } else { 3 })
    }

    /// Program counter onto the address bus, then increment it.
    ///
    /// Ending anywhere but the final step also resets the timer there.
    fn load_next_at(&mut self, step: usize) -> &mut Self {
        self.oc.uses_trailer = true;
        self.phi1(step, L::FETCH).phi2(step, L::PCIN);
        if step != self.last() {
            self.phi2(step, L::CTMR);
        }
        self
    }

    fn load_next(&mut self) -> &mut Self {
        self.load_next_at(self.last())
    }
}

fn each_slot(oc: &mut OpCode, mut build: impl FnMut(&mut Slot<'_>)) {
    for flags in 0..FLAG_SLOTS as u8 {
        build(&mut Slot {
            oc: &mut *oc,
            flags,
        });
    }
}

fn syntax(name: &str, operand: &str) -> String {
    if operand.is_empty() {
        name.to_owned()
    } else {
        format!("{name} {operand}")
    }
}

/// Index register lines for the X and Y indexed modes.
const X_INDEX: L = L::SBD0.union(L::SBD2);
const Y_INDEX: L = L::SBD1.union(L::SBD2);

fn addressing(s: &mut Slot<'_>) {
    match s.oc.addr_mode {
        AddressMode::Acc => {
            s.phi1(0, L::DBD0 | L::DBD2 | L::SBD0 | L::SBD1 | L::SBD2);
        }
        AddressMode::Imm | AddressMode::Rel => {
            s.phi1(0, L::FETCH).phi2(0, L::PCIN);
        }
        AddressMode::Zpg => {
            s.phi1(0, L::FETCH)
                .phi2(0, L::PCIN)
                .phi1(1, L::AHC1 | L::AHC0 | L::ALD0 | L::ALD1 | L::ALD2 | L::AHLD | L::ALLD);
        }
        mode @ (AddressMode::Zpx | AddressMode::Zpy) => {
            let index = if mode == AddressMode::Zpx { X_INDEX } else { Y_INDEX };
            s.phi1(0, L::FETCH)
                .phi2(0, L::PCIN)
                .phi1(1, L::AULB | L::AULA | index)
                .phi1(2, L::AHC1 | L::AHC0 | L::ALD0 | L::ALD1 | L::AHLD | L::ALLD);
        }
        AddressMode::Abs => {
            s.phi1(0, L::FETCH)
                .phi2(0, L::PCIN)
                .phi1(1, L::FETCH | L::AULB | L::AULA | L::AUSA)
                .phi2(1, L::PCIN)
                .phi1(2, L::AHD0 | L::ALD0 | L::ALD1 | L::ALLD | L::AHLD);
        }
        mode @ (AddressMode::Abx | AddressMode::Aby) => {
            let index = if mode == AddressMode::Abx { X_INDEX } else { Y_INDEX };
            s.phi1(0, L::FETCH | index | L::AULA)
                .phi2(0, L::PCIN)
                .phi1(1, L::FETCH | L::AULB)
                .phi2(1, L::PCIN | L::FLG2)
                .phi1(2, L::AHD0 | L::ALD0 | L::ALD1 | L::ALLD | L::AHLD | L::FLG2)
                .phi2(2, L::FLG2)
                .phi1(3, L::FLG2)
                .phi2(3, L::FLG2)
                .phi1(4, L::FLG2);
            if s.carry() {
                // page crossed, increment the high byte
                s.phi1(2, L::AULB | L::AULA | L::AUSA)
                    .phi2(2, L::FMAN)
                    .phi1(3, L::AHD1 | L::AHLD | L::SBD2);
            }
        }
        AddressMode::Izx => {
            s.phi1(0, L::FETCH | L::AULA | X_INDEX)
                .phi2(0, L::PCIN)
                .phi1(1, L::AULB)
                .phi1(
                    2,
                    L::AHC1
                        | L::AHC0
                        | L::ALD0
                        | L::ALD1
                        | L::ALLD
                        | L::AHLD
                        | L::AULB
                        | L::AULA
                        | L::AUSB
                        | L::AUSA,
                )
                .phi2(2, L::FMAN)
                .phi1(3, L::ALD0 | L::ALD1 | L::ALLD | L::AULB | L::AULA | L::AUSA)
                .phi1(4, L::AHD0 | L::ALD0 | L::ALD1 | L::ALLD | L::AHLD);
        }
        AddressMode::Izy => {
            s.phi1(0, L::FETCH)
                .phi2(0, L::PCIN)
                .phi1(
                    1,
                    L::AHC1
                        | L::AHC0
                        | L::ALD0
                        | L::ALD1
                        | L::ALD2
                        | L::ALLD
                        | L::AHLD
                        | L::AULB
                        | L::AULA
                        | L::AUSA,
                )
                .phi2(1, L::FMAN)
                .phi1(2, L::ALD0 | L::ALD1 | L::ALLD | L::AULB | L::AULA | Y_INDEX)
                .phi2(2, L::FLG2)
                .phi1(3, L::AHD0 | L::ALD0 | L::ALD1 | L::ALLD | L::AHLD | L::FLG2)
                .phi2(3, L::FLG2)
                .phi1(4, L::FLG2)
                .phi2(4, L::FLG2)
                .phi1(5, L::FLG2);
            if s.carry() {
                s.phi1(3, L::AULB | L::AULA | L::AUSA)
                    .phi2(3, L::FMAN)
                    .phi1(4, L::AHD1 | L::AHLD | L::SBD2);
            }
        }
        AddressMode::Imp | AddressMode::Ind => {}
    }
}

/// XOR contribution of the addressing skeleton and the trailer alone.
///
/// XORing this into a word cancels everything the shared stages put there,
/// leaving the lines that belong to the operation itself.
pub(crate) fn skeleton(oc: &OpCode) -> Matrix {
    let mut bare = oc.clone();
    bare.lines = [[[L::empty(); 2]; super::opcode::MAX_STEPS]; FLAG_SLOTS];
    let (with_addressing, with_trailer) = (oc.uses_addressing, oc.uses_trailer);
    each_slot(&mut bare, |s| {
        if with_addressing {
            addressing(s);
        }
        if with_trailer {
            s.load_next();
        }
    });
    bare.lines
}

/// An instruction with an operand fetch. Page-crossing forms take one more step.
pub(crate) fn operand(
    mode: AddressMode,
    name: &str,
    operand: &str,
    op_code: u8,
    length: u8,
    cycles: u8,
    page_cross: bool,
) -> OpCode {
    let steps = cycles + u8::from(page_cross);
    let mut oc = OpCode::blank(op_code, name, syntax(name, operand), mode, length - 1, steps);
    oc.page_cross = page_cross;
    oc.uses_addressing = true;
    each_slot(&mut oc, addressing);
    oc
}

/// Opcodes the architecture leaves undefined: fetch, then reset the timer.
pub(crate) fn undefined(op_code: u8) -> OpCode {
    let mut oc = OpCode::blank(
        op_code,
        &format!("x{op_code:02X}"),
        String::new(),
        AddressMode::Imp,
        0,
        1,
    );
    oc.is_virtual = true;
    oc
}

/// BRK and the RST/NMI/IRQ pseudo-instructions the board injects.
pub(crate) fn interrupt(name: &str, op_code: u8) -> OpCode {
    let mut oc = OpCode::blank(op_code, name, name.to_owned(), AddressMode::Imp, 0, 7);
    oc.is_virtual = op_code != 0x00;
    each_slot(&mut oc, |s| {
        s.phi2(0, L::PCIN)
            .phi1(1, L::AHC1 | L::DBD1 | L::ALD2 | L::ALLD | L::AHLD | L::AULB | L::AULA | L::AUSB)
            .phi1(2, L::DBD0 | L::DBD1 | L::ALD0 | L::ALD1 | L::ALLD | L::AULB | L::AUSB)
            .phi1(3, L::DBD2 | L::ALD0 | L::ALD1 | L::ALLD | L::AULB | L::AUSB)
            .phi1(4, L::ALD0 | L::ALD2 | L::ALLD | L::AHLD | L::SPLD | L::AULB | L::SBD2)
            .phi2(4, L::ALD0 | L::ALD1 | L::ALD2 | L::PCLL)
            .phi1(5, L::ALD0 | L::ALD2 | L::ALLD)
            .phi2(5, L::AHD0 | L::PCLH | L::FSIB | L::FMAN)
            .load_next();

        if op_code != 0x00 {
            let manual = if s.carry() { L::FMAN } else { L::empty() };
            s.phi2(2, L::FSCB | manual);
        }

        match op_code {
            0x02 => {
                s.phi1(0, L::AHC1 | L::AHC0 | L::SPLD | L::CRST | L::SBD0)
                    .phi2(
                        0,
                        L::AHC1
                            | L::AHC0
                            | L::DBD0
                            | L::DBD2
                            | L::SBD0
                            | L::FSVA
                            | L::FSIB
                            | L::FSVB
                            | L::FSCB
                            | L::FSCA
                            | L::FSIA,
                    )
                    .phi1(4, L::ALC1 | L::ALC0)
                    .phi1(5, L::ALC1);
            }
            _ => {
                // BRK, NMI and IRQ push PC and status; only the vector differs
                let vector = if op_code == 0x12 {
                    s.phi1(0, L::CRST).phi1(5, L::ALC2);
                    L::ALC2 | L::ALC0
                } else {
                    L::ALC0
                };
                s.phi2(1, L::DBRW)
                    .phi1(2, L::DBRW)
                    .phi2(2, L::DBRW)
                    .phi1(3, L::DBRW)
                    .phi2(3, L::DBRW)
                    .phi1(4, L::DBRW | vector);
            }
        }
    });
    oc
}

/// Conditional branch on one bit of the flags nibble.
///
/// Every slot encodes taken or not taken, and for taken branches the
/// secondary flags tell whether the offset add crossed a page forwards
/// (carry) or backwards (sign).
pub(crate) fn branch(name: &str, op_code: u8, bit: u8, set: bool) -> OpCode {
    let mut oc = OpCode::blank(
        op_code,
        name,
        format!("{name} Label (Displacement: -128 to +127)"),
        AddressMode::Rel,
        1,
        4,
    );
    oc.page_cross = true;
    oc.branch_bit = bit;
    oc.branch_set = set;
    let probe = oc.clone();

    each_slot(&mut oc, |s| {
        s.phi1(0, L::FETCH)
            .phi2(0, L::PCIN)
            .phi1(1, L::FETCH | L::AULB | L::AULA | L::AUSB | L::SBD1);

        if probe.branch_taken(s.flags) {
            s.phi2(1, L::ALD0 | L::ALD1 | L::PCLL | L::FLG2);
        } else {
            s.phi2(1, L::CTMR | L::PCIN | L::FLG2);
        }

        match s.flags & (flag::C | flag::N) {
            flag::C => {
                s.phi1(
                    2,
                    L::AHD0 | L::AHD1 | L::DBD0 | L::AULB | L::AULA | L::AUIB | L::FLG2 | L::SBD0,
                )
                .phi2(
                    2,
                    L::AHD1 | L::PCLH | L::CARRY_IN | L::FLG2 | L::SBD2 | L::CENB,
                );
            }
            flag::N => {
                s.phi1(
                    2,
                    L::AHD0
                        | L::AHD1
                        | L::ALD0
                        | L::ALD2
                        | L::AULB
                        | L::AULA
                        | L::AUSB
                        | L::FLG2
                        | L::SBD0,
                )
                .phi2(2, L::AHD1 | L::PCLH | L::SBD2);
            }
            _ => {
                s.phi1(2, L::ALD0 | L::ALD1 | L::ALLD | L::FLG2)
                    .phi2(2, L::CTMR | L::PCIN);
            }
        }

        s.phi1(3, L::AHD1 | L::ALD1 | L::ALD2 | L::ALLD | L::AHLD | L::SBD2)
            .phi2(3, L::PCIN);
    });
    oc
}

/// Single-step implied instruction: `phi1`/`phi2` on step 0, then the trailer.
/// Covers the flag and register-transfer instructions.
pub(crate) fn implied(name: &str, op_code: u8, phi1: L, phi2: L) -> OpCode {
    let mut oc = OpCode::blank(op_code, name, name.to_owned(), AddressMode::Imp, 0, 2);
    each_slot(&mut oc, |s| {
        s.phi1(0, phi1).phi2(0, phi2).load_next();
    });
    oc
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum StackOp {
    /// X to stack pointer
    Txs,
    /// Stack pointer to X
    Tsx,
    /// Push whatever the lines drive onto the data bus
    Push(L),
    /// Pull into whatever the lines load
    Pull(L),
}

pub(crate) fn stack(name: &str, op_code: u8, steps: u8, op: StackOp) -> OpCode {
    let mut oc = OpCode::blank(op_code, name, name.to_owned(), AddressMode::Imp, 0, steps);
    each_slot(&mut oc, |s| {
        match op {
            StackOp::Txs => {
                s.phi1(0, L::SPLD | X_INDEX);
            }
            StackOp::Tsx => {
                s.phi2(0, L::SBLX | L::SBD0 | L::SBD1 | L::FSIA);
            }
            StackOp::Push(source) => {
                s.phi1(0, L::AHC1 | L::ALD2 | L::ALLD | L::AHLD | source)
                    .phi2(0, L::DBRW)
                    .phi1(1, L::DBRW | L::ALD2 | L::AULB | L::AULA | L::AUSB | L::SBD0)
                    .phi1(2, L::SPLD | L::SBD2);
            }
            StackOp::Pull(load) => {
                s.phi1(0, L::ALD2 | L::AULB | L::AULA | L::AUSB | L::AUSA)
                    .phi2(0, L::FMAN | L::CENB)
                    .phi1(
                        1,
                        L::AHC1 | L::ALD0 | L::ALD1 | L::ALLD | L::AHLD | L::SPLD | L::SBD2,
                    )
                    .phi1(2, L::AULB | L::AULA | L::AUSA)
                    .phi2(2, L::DBD0 | L::DBD2 | L::SBLA | L::SBD2 | load);
            }
        }
        s.load_next();
    });
    oc
}

pub(crate) fn jump_subroutine(op_code: u8) -> OpCode {
    let mut oc = OpCode::blank(op_code, "JSR", "JSR $5597".to_owned(), AddressMode::Abs, 2, 6);
    each_slot(&mut oc, |s| {
        s.phi1(0, L::FETCH | L::AULA | L::AUSA)
            .phi2(0, L::PCIN)
            .phi1(
                1,
                L::AHC1 | L::ALD2 | L::ALLD | L::AHLD | L::SPLD | L::AULB | L::AUSB | L::SBD1,
            )
            .phi1(2, L::DBD1 | L::ALD0 | L::ALD1 | L::ALLD | L::AULB | L::AULA | L::AUSB)
            .phi2(2, L::DBRW)
            .phi1(
                3,
                L::DBRW | L::DBD0 | L::DBD1 | L::ALD0 | L::ALD1 | L::ALLD | L::AULB | L::AUSB,
            )
            .phi2(3, L::DBRW)
            .phi1(4, L::DBRW | L::FETCH)
            .phi2(4, L::AHD0 | L::ALD2 | L::PCLL | L::PCLH)
            .phi1(5, L::SPLD | L::SBD2)
            .load_next();
    });
    oc
}

pub(crate) fn jump(mode: AddressMode, operand: &str, op_code: u8, steps: u8) -> OpCode {
    let mut oc = OpCode::blank(op_code, "JMP", syntax("JMP", operand), mode, 2, steps);
    each_slot(&mut oc, |s| {
        s.phi1(0, L::FETCH)
            .phi2(0, L::PCIN)
            .phi1(1, L::FETCH | L::AULA | L::AULB | L::AUSA);
        // the final step loads both program counter halves from the address buses
        let target = L::AHD0 | L::ALD0 | L::ALD1 | L::PCLL | L::PCLH;
        if mode == AddressMode::Ind {
            s.phi2(1, L::PCIN)
                .phi1(2, L::AHD0 | L::ALD0 | L::ALD1 | L::ALLD | L::AHLD)
                .phi2(2, L::CARRY_IN)
                .phi1(3, L::ALD0 | L::ALD1 | L::ALLD | L::AULB)
                .phi2(3, target);
        } else {
            s.phi2(1, target);
        }
        s.load_next();
    });
    oc
}

pub(crate) fn load(mut oc: OpCode, register: L) -> OpCode {
    each_slot(&mut oc, |s| {
        let lines = register | L::SBD1 | L::FSIA;
        if let Some(step) = s.short_path() {
            s.phi2(step - 1, lines | L::FLG2).load_next_at(step);
        } else {
            let step = s.last() - 1;
            s.phi2(step, lines);
        }
        s.load_next();
    });
    oc
}

pub(crate) fn store(mut oc: OpCode, register: L) -> OpCode {
    each_slot(&mut oc, |s| {
        let last = s.last();
        s.phi1(last - 1, register)
            .phi2(last - 1, L::DBRW)
            .phi1(last, L::DBRW)
            .load_next();
    });
    oc
}

/// Add, subtract and compare. Compares (no accumulator store) force carry on.
pub(crate) fn arithmetic(mut oc: OpCode, source: L, results: L) -> OpCode {
    each_slot(&mut oc, |s| {
        let step = match s.short_path() {
            Some(step) => {
                s.phi2(step, L::FLG2);
                step
            }
            None => s.last(),
        };
        if !results.contains(L::SBLA) {
            s.phi2(0, L::FSCB | L::FMAN);
        }
        s.phi1(step, L::AULB | source | L::AULA)
            .phi2(
                step,
                L::DBD0 | L::DBD2 | results | L::SBD2 | L::FSCA | L::FSIA | L::CENB,
            )
            .load_next_at(step);
    });
    oc
}

pub(crate) fn logic(mut oc: OpCode, operation: L, alu_a: L) -> OpCode {
    each_slot(&mut oc, |s| {
        let step = match s.short_path() {
            Some(step) => {
                s.phi2(step, L::FLG2);
                step
            }
            None => s.last(),
        };
        s.phi1(step, operation | L::AULB | alu_a)
            .phi2(
                step,
                operation | L::DBD0 | L::DBD2 | L::SBLA | L::SBD2 | L::FSIA,
            )
            .load_next_at(step);
    });
    oc
}

pub(crate) fn shift(mut oc: OpCode, operation: L, direction: L) -> OpCode {
    each_slot(&mut oc, |s| {
        let alu = L::DBD0 | L::DBD2 | operation | direction | L::SBD2 | L::FSCA | L::FSIA;
        if s.oc.addr_mode == AddressMode::Acc {
            s.phi1(0, L::AULA | L::AULB | L::AUSA)
                .phi2(0, alu | L::SBLA);
        } else {
            // read-modify-write: shift, drive the result, write it back
            let last = s.last();
            s.phi1(last - 2, L::AULA | L::AULB | L::AUSA)
                .phi2(last - 2, alu)
                .phi1(last - 1, L::DBD0 | L::DBD2 | L::SBD2)
                .phi2(last - 1, L::DBRW)
                .phi1(last, L::DBRW);
        }
        s.load_next();
    });
    oc
}

/// INC/DEC on memory. `direction` carries the constant for increments.
pub(crate) fn modify(mut oc: OpCode, direction: L) -> OpCode {
    each_slot(&mut oc, |s| {
        let last = s.last();
        s.phi1(last - 2, L::AULB | L::AULA | L::SBD0 | direction)
            .phi1(last - 1, L::DBD0 | L::DBD2 | L::SBD2)
            .phi2(last - 1, L::DBRW | L::FSIA)
            .phi1(last, L::DBRW)
            .load_next();
    });
    oc
}

pub(crate) fn bit_test(mut oc: OpCode) -> OpCode {
    each_slot(&mut oc, |s| {
        let last = s.last();
        s.phi1(
            last - 1,
            L::DBD0 | L::DBD2 | L::AULB | L::SBD0 | L::SBD1 | L::SBD2,
        )
        .phi2(last - 1, L::FSVA | L::FSIB | L::FSVB | L::FLG2 | L::FSIA)
        .phi1(last, L::AULA | L::SBD1)
        .phi2(last, L::DBD0 | L::DBD2 | L::AUO2 | L::FLG2 | L::SBD2 | L::FSIA)
        .load_next();
    });
    oc
}

pub(crate) fn no_operation(mut oc: OpCode) -> OpCode {
    each_slot(&mut oc, |s| {
        s.load_next();
    });
    oc
}

pub(crate) fn return_subroutine(mut oc: OpCode) -> OpCode {
    each_slot(&mut oc, |s| {
        s.phi1(0, L::ALD2 | L::AULB | L::AULA | L::AUSB | L::AUSA)
            .phi2(0, L::CARRY_IN | L::CENB)
            .phi1(
                1,
                L::AHC1
                    | L::ALD0
                    | L::ALD1
                    | L::ALLD
                    | L::AHLD
                    | L::SPLD
                    | L::AULB
                    | L::AUSB
                    | L::SBD2,
            )
            .phi2(1, L::ALD0 | L::ALD1 | L::ALD2 | L::PCLL | L::CARRY_IN | L::CENB)
            .phi1(2, L::ALD0 | L::ALD1 | L::ALLD | L::SPLD | L::SBD2)
            .phi2(2, L::AHD0 | L::PCLH)
            .phi2(3, L::PCIN)
            .load_next();
    });
    oc
}

pub(crate) fn return_interrupt(mut oc: OpCode) -> OpCode {
    each_slot(&mut oc, |s| {
        s.phi1(1, L::ALD2 | L::AULB | L::AULA | L::AUSB | L::AUSA)
            .phi2(1, L::FMAN | L::CENB)
            .phi1(2, L::AHC1 | L::ALD0 | L::ALD1 | L::ALLD | L::AHLD | L::AULB | L::AUSB)
            .phi2(
                2,
                L::FSVA | L::FSIB | L::FSVB | L::FSCB | L::FSCA | L::FMAN | L::FSIA | L::CENB,
            )
            .phi1(3, L::ALD0 | L::ALD1 | L::ALLD | L::AULB | L::AUSB)
            .phi2(3, L::ALD0 | L::ALD1 | L::ALD2 | L::PCLL | L::FMAN | L::CENB)
            .phi1(4, L::ALD0 | L::ALD1 | L::ALLD | L::SPLD | L::AULB | L::AUSB)
            .phi2(4, L::AHD0 | L::PCLH)
            .load_next();
    });
    oc
}
