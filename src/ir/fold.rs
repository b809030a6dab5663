//! Local constant folding and strength reduction over symbolic values.
//!
//! Folding never changes the meaning of an expression; it only removes work
//! that can be done without a solver, so that conditions with a known truth
//! value are recognised as such while stepping.

use ethnum::U256;

use crate::ir::{
    expression::{mask, BinaryOp, Expression, UnaryOp},
    types::Type,
};

/// Simplifies `expr` bottom-up.
#[must_use]
pub fn simplify(expr: &Expression) -> Expression {
    match expr {
        Expression::Unary { op, operand, .. } => fold_unary(*op, simplify(operand)),
        Expression::Binary {
            op, left, right, ..
        } => fold_binary(*op, simplify(left), simplify(right)),
        Expression::Mux {
            condition,
            if_true,
            if_false,
            ..
        } => {
            let condition = simplify(condition);
            let if_true = simplify(if_true);
            let if_false = simplify(if_false);
            match condition.as_bool() {
                Some(true) => if_true,
                Some(false) => if_false,
                None if if_true == if_false => if_true,
                None => Expression::mux(condition, if_true, if_false),
            }
        }
        Expression::Aggregate { components, ty } => {
            Expression::aggregate(components.iter().map(simplify).collect(), ty.clone())
        }
        _ => expr.clone(),
    }
}

fn fold_unary(op: UnaryOp, operand: Expression) -> Expression {
    match (op, &operand) {
        (UnaryOp::Not, Expression::Bool(b)) => Expression::bool(!b),
        (
            UnaryOp::Not,
            Expression::Unary {
                op: UnaryOp::Not,
                operand: inner,
                ..
            },
        ) => inner.as_ref().clone(),
        (UnaryOp::Neg, Expression::Constant { value, ty }) => {
            Expression::constant(U256::ZERO.wrapping_sub(*value), ty.clone())
        }
        (UnaryOp::Complement, Expression::Constant { value, ty }) => {
            Expression::constant(!*value, ty.clone())
        }
        _ => Expression::unary(op, operand),
    }
}

fn fold_binary(op: BinaryOp, left: Expression, right: Expression) -> Expression {
    if let (Some(l), Some(r)) = (left.as_constant(), right.as_constant()) {
        if let Some(folded) = fold_constants(op, l, r, &left.ty()) {
            return folded;
        }
    }
    if let (Some(l), Some(r)) = (left.as_bool(), right.as_bool()) {
        match op {
            BinaryOp::LAnd => return Expression::bool(l && r),
            BinaryOp::LOr => return Expression::bool(l || r),
            BinaryOp::Eq => return Expression::bool(l == r),
            BinaryOp::Neq => return Expression::bool(l != r),
            _ => {}
        }
    }
    reduce_strength(op, left, right)
}

fn fold_constants(op: BinaryOp, l: U256, r: U256, ty: &Type) -> Option<Expression> {
    let (sl, sr) = if ty.is_signed() {
        // Flipping the sign bit maps two's complement order onto unsigned order.
        let sign = ty.width().map_or(U256::ZERO, |w| U256::ONE << u32::from(w - 1));
        (l ^ sign, r ^ sign)
    } else {
        (l, r)
    };
    let value = match op {
        BinaryOp::Add => l.wrapping_add(r),
        BinaryOp::Sub => l.wrapping_sub(r),
        BinaryOp::Mul => l.wrapping_mul(r),
        BinaryOp::BitAnd => l & r,
        BinaryOp::BitOr => l | r,
        BinaryOp::BitXor => l ^ r,
        BinaryOp::Shl => shift(l, r, true),
        BinaryOp::Shr => shift(l, r, false),
        BinaryOp::Eq => return Some(Expression::bool(l == r)),
        BinaryOp::Neq => return Some(Expression::bool(l != r)),
        BinaryOp::Lt => return Some(Expression::bool(sl < sr)),
        BinaryOp::Le => return Some(Expression::bool(sl <= sr)),
        BinaryOp::Gt => return Some(Expression::bool(sl > sr)),
        BinaryOp::Ge => return Some(Expression::bool(sl >= sr)),
        BinaryOp::LAnd | BinaryOp::LOr => return None,
    };
    Some(Expression::constant(mask(value, ty), ty.clone()))
}

fn shift(value: U256, amount: U256, left: bool) -> U256 {
    if amount >= U256::from(256u32) {
        return U256::ZERO;
    }
    let amount = amount.as_u32();
    if left {
        value << amount
    } else {
        value >> amount
    }
}

fn is_zero(e: &Expression) -> bool {
    e.as_constant() == Some(U256::ZERO)
}

fn is_one(e: &Expression) -> bool {
    e.as_constant() == Some(U256::ONE)
}

fn reduce_strength(op: BinaryOp, left: Expression, right: Expression) -> Expression {
    match op {
        BinaryOp::LAnd => match (left.as_bool(), right.as_bool()) {
            (Some(false), _) | (_, Some(false)) => Expression::bool(false),
            (Some(true), _) => right,
            (_, Some(true)) => left,
            _ => Expression::binary(op, left, right),
        },
        BinaryOp::LOr => match (left.as_bool(), right.as_bool()) {
            (Some(true), _) | (_, Some(true)) => Expression::bool(true),
            (Some(false), _) => right,
            (_, Some(false)) => left,
            _ => Expression::binary(op, left, right),
        },
        BinaryOp::Add | BinaryOp::BitOr | BinaryOp::BitXor if is_zero(&right) => left,
        BinaryOp::Add | BinaryOp::BitOr | BinaryOp::BitXor if is_zero(&left) => right,
        BinaryOp::Sub | BinaryOp::Shl | BinaryOp::Shr if is_zero(&right) => left,
        BinaryOp::Mul if is_one(&right) => left,
        BinaryOp::Mul if is_one(&left) => right,
        BinaryOp::Mul | BinaryOp::BitAnd if is_zero(&right) && !left.is_tainted() => right,
        BinaryOp::Mul | BinaryOp::BitAnd if is_zero(&left) && !right.is_tainted() => left,
        BinaryOp::Eq if left == right && !left.is_tainted() => Expression::bool(true),
        BinaryOp::Neq if left == right && !left.is_tainted() => Expression::bool(false),
        _ => Expression::binary(op, left, right),
    }
}
