//! Evaluation of combinational nodes over slots of one shared state.
//!
//! Each function reads its operands from `state`, writes the result slot and
//! leaves everything else untouched. An absent operand or one with any
//! undefined bit makes the whole result undefined. Operand and result slots of
//! arithmetic, logic and compare nodes must fit one word and must not straddle
//! a word boundary.

use crate::bit_state::{
    BITS_PER_WORD, BitVectorState, Plane, all_defined_non_straddling, bit_mask_range,
};
use crate::graph::{ArithmeticOp, CompareOp, Interpretation, LogicOp};
use crate::{InternalError, internal_assert};

/// Location of one value inside the simulation state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Slot {
    pub offset: usize,
    pub width: usize,
}

impl Slot {
    pub fn new(offset: usize, width: usize) -> Self {
        Self { offset, width }
    }
}

fn check_word(slot: Option<Slot>) -> Result<(), InternalError> {
    if let Some(slot) = slot {
        internal_assert!(
            slot.width <= BITS_PER_WORD,
            "{} bit operands exceed one word",
            slot.width
        );
    }
    Ok(())
}

/// The operand value if it is present and fully defined.
fn read(state: &BitVectorState, slot: Option<Slot>) -> Option<u64> {
    let slot = slot?;
    if slot.width == 0 {
        return Some(0);
    }
    if !all_defined_non_straddling(state, slot.offset, slot.width) {
        return None;
    }
    Some(state.extract_non_straddling(Plane::Value, slot.offset, slot.width))
}

fn write(state: &mut BitVectorState, out: Slot, value: Option<u64>) {
    match value {
        Some(value) => {
            state.insert_non_straddling(Plane::Value, out.offset, out.width, value);
            state.set_range(Plane::Defined, out.offset, out.width, true);
        }
        None => undefine(state, out),
    }
}

pub fn undefine(state: &mut BitVectorState, out: Slot) {
    state.clear_range(Plane::Defined, out.offset, out.width);
}

pub fn arithmetic(
    op: ArithmeticOp,
    interpretation: Interpretation,
    state: &mut BitVectorState,
    out: Slot,
    lhs: Option<Slot>,
    rhs: Option<Slot>,
) -> Result<(), InternalError> {
    internal_assert!(
        interpretation != Interpretation::Bool,
        "arithmetic is not defined on booleans"
    );
    for slot in [Some(out), lhs, rhs] {
        check_word(slot)?;
    }
    let (Some(a), Some(b)) = (read(state, lhs), read(state, rhs)) else {
        undefine(state, out);
        return Ok(());
    };
    let value = match op {
        ArithmeticOp::Add => Some(a.wrapping_add(b)),
        ArithmeticOp::Sub => Some(a.wrapping_sub(b)),
        ArithmeticOp::Mul => Some(a.wrapping_mul(b)),
        ArithmeticOp::Div => a.checked_div(b),
        ArithmeticOp::Rem => a.checked_rem(b),
    };
    write(state, out, value.map(|v| v & bit_mask_range(0, out.width)));
    Ok(())
}

pub fn logic(
    op: LogicOp,
    state: &mut BitVectorState,
    out: Slot,
    lhs: Option<Slot>,
    rhs: Option<Slot>,
) -> Result<(), InternalError> {
    for slot in [Some(out), lhs, rhs] {
        check_word(slot)?;
    }
    let value = if op == LogicOp::Not {
        read(state, lhs).map(|a| !a)
    } else {
        match (read(state, lhs), read(state, rhs)) {
            (Some(a), Some(b)) => Some(match op {
                LogicOp::And => a & b,
                LogicOp::Nand => !(a & b),
                LogicOp::Or => a | b,
                LogicOp::Nor => !(a | b),
                LogicOp::Xor => a ^ b,
                LogicOp::Eq => !(a ^ b),
                LogicOp::Not => !a,
            }),
            _ => None,
        }
    };
    write(state, out, value.map(|v| v & bit_mask_range(0, out.width)));
    Ok(())
}

pub fn compare(
    op: CompareOp,
    state: &mut BitVectorState,
    out: Slot,
    lhs: Option<Slot>,
    rhs: Option<Slot>,
) -> Result<(), InternalError> {
    for slot in [Some(out), lhs, rhs] {
        check_word(slot)?;
    }
    let value = match (read(state, lhs), read(state, rhs)) {
        (Some(a), Some(b)) => Some(match op {
            CompareOp::Eq => a == b,
            CompareOp::Neq => a != b,
            CompareOp::Lt => a < b,
            CompareOp::Gt => a > b,
            CompareOp::Leq => a <= b,
            CompareOp::Geq => a >= b,
        }),
        _ => None,
    };
    write(state, out, value.map(u64::from));
    Ok(())
}

/// Copies `input` to `out`, zero filling a wider output.
pub fn forward(state: &mut BitVectorState, out: Slot, input: Option<Slot>) {
    let Some(input) = input else {
        undefine(state, out);
        return;
    };
    let width = out.width.min(input.width);
    state.copy_within(out.offset, input.offset, width);
    if out.width > width {
        let rest = out.width - width;
        state.clear_range(Plane::Value, out.offset + width, rest);
        state.set_range(Plane::Defined, out.offset + width, rest, true);
    }
}

/// Forwards the data input picked by `selector`. An undefined or out of range
/// selector makes the output undefined.
pub fn multiplexer(
    state: &mut BitVectorState,
    out: Slot,
    selector: Option<Slot>,
    inputs: &[Option<Slot>],
) -> Result<(), InternalError> {
    check_word(selector)?;
    match read(state, selector).and_then(|s| inputs.get(usize::try_from(s).ok()?)) {
        Some(&input) => forward(state, out, input),
        None => undefine(state, out),
    }
    Ok(())
}
