use fission_module::Instruction;

use crate::{ExprError, ExprOp};

/// Finds the start of the shortest suffix of `insts` that leaves exactly
/// `required` values on the stack.
///
/// Walks backward keeping a count of values still owed: every operand an
/// instruction pops is owed as well, every result it pushes pays one back.
/// Returns `None` when the stream runs out first.
pub fn find_slice_start(insts: &[Instruction], required: u32) -> Result<Option<usize>, ExprError> {
    let mut owed = i64::from(required);

    for (index, inst) in insts.iter().enumerate().rev() {
        let effect = ExprOp::classify(inst)?.effect();
        owed += i64::from(effect.pops);
        if effect.yields() {
            owed -= 1;
        }
        if owed == 0 {
            return Ok(Some(index));
        }
    }

    Ok(None)
}
