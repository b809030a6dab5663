//! This module contains the expression language of the program
//! representation, including the symbolic values that the interpreter builds.

use std::fmt::{Display, Formatter};

use ethnum::U256;
use itertools::Itertools;

use crate::ir::types::Type;

/// The unary operators of the language.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum UnaryOp {
    /// Arithmetic negation.
    Neg,

    /// Logical negation of a boolean.
    Not,

    /// Bitwise complement.
    Complement,
}

impl UnaryOp {
    /// Gets the source-level symbol of the operator.
    #[must_use]
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Neg => "-",
            Self::Not => "!",
            Self::Complement => "~",
        }
    }
}

/// The binary operators of the language.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
    Eq,
    Neq,
    Lt,
    Le,
    Gt,
    Ge,
    LAnd,
    LOr,
}

impl BinaryOp {
    /// Checks if the operator produces a boolean.
    #[must_use]
    pub fn is_boolean(self) -> bool {
        matches!(
            self,
            Self::Eq
                | Self::Neq
                | Self::Lt
                | Self::Le
                | Self::Gt
                | Self::Ge
                | Self::LAnd
                | Self::LOr
        )
    }

    /// Gets the source-level symbol of the operator.
    #[must_use]
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::BitAnd => "&",
            Self::BitOr => "|",
            Self::BitXor => "^",
            Self::Shl => "<<",
            Self::Shr => ">>",
            Self::Eq => "==",
            Self::Neq => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::LAnd => "&&",
            Self::LOr => "||",
        }
    }
}

/// An expression in the program.
///
/// # Values
///
/// A subset of expressions are _symbolic values_: literals, symbolic
/// variables, taint, and operators or aggregates built only from symbolic
/// values. See [`Self::is_symbolic_value`]. Everything else (storage
/// references and method calls) must be stepped before its value is known.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum Expression {
    /// A bit-vector literal, always held masked to the width of `ty`.
    Constant { value: U256, ty: Type },

    /// A boolean literal.
    Bool(bool),

    /// An unconstrained input of the program, such as a packet field or a
    /// control-plane choice.
    SymbolicVariable { name: String, ty: Type },

    /// A value whose concrete content cannot be determined by the analysis.
    Taint { ty: Type },

    /// A reference to a declaration by name.
    Path { name: String, ty: Type },

    /// Access to the field `field` of `base`.
    Member {
        base:  Box<Expression>,
        field: String,
        ty:    Type,
    },

    /// Access to the element at the constant `index` of the array `base`.
    ArrayIndex {
        base:  Box<Expression>,
        index: usize,
        ty:    Type,
    },

    /// A unary operation.
    Unary {
        op:      UnaryOp,
        operand: Box<Expression>,
        ty:      Type,
    },

    /// A binary operation.
    Binary {
        op:    BinaryOp,
        left:  Box<Expression>,
        right: Box<Expression>,
        ty:    Type,
    },

    /// A conditional selection between two values.
    Mux {
        condition: Box<Expression>,
        if_true:   Box<Expression>,
        if_false:  Box<Expression>,
        ty:        Type,
    },

    /// A struct, header, union or array literal, with components in the field
    /// declaration (or element) order of `ty`.
    Aggregate { components: Vec<Expression>, ty: Type },

    /// A call to a method or function.
    MethodCall(MethodCall),
}

impl Expression {
    /// Constructs a bit-vector literal of type `ty`, masking `value` to the
    /// width of that type.
    #[must_use]
    pub fn constant(value: impl Into<U256>, ty: Type) -> Self {
        let value = mask(value.into(), &ty);
        Self::Constant { value, ty }
    }

    /// Constructs an unsigned literal `value` of `width` bits.
    #[must_use]
    pub fn bits(value: u128, width: u16) -> Self {
        Self::constant(value, Type::bits(width))
    }

    /// Constructs a boolean literal.
    #[must_use]
    pub fn bool(value: bool) -> Self {
        Self::Bool(value)
    }

    /// Constructs a symbolic variable called `name` of type `ty`.
    #[must_use]
    pub fn symbolic(name: impl Into<String>, ty: Type) -> Self {
        Self::SymbolicVariable {
            name: name.into(),
            ty,
        }
    }

    /// Constructs a tainted value of type `ty`.
    #[must_use]
    pub fn taint(ty: Type) -> Self {
        Self::Taint { ty }
    }

    /// Constructs a reference to the declaration called `name`.
    #[must_use]
    pub fn path(name: impl Into<String>, ty: Type) -> Self {
        Self::Path {
            name: name.into(),
            ty,
        }
    }

    /// Constructs an access to the field `field` (of type `ty`) of `base`.
    #[must_use]
    pub fn member(base: Expression, field: impl Into<String>, ty: Type) -> Self {
        Self::Member {
            base: Box::new(base),
            field: field.into(),
            ty,
        }
    }

    /// Constructs an access to the element at `index` (of type `ty`) of
    /// `base`.
    #[must_use]
    pub fn index(base: Expression, index: usize, ty: Type) -> Self {
        Self::ArrayIndex {
            base: Box::new(base),
            index,
            ty,
        }
    }

    /// Constructs a unary operation.
    #[must_use]
    pub fn unary(op: UnaryOp, operand: Expression) -> Self {
        let ty = match op {
            UnaryOp::Not => Type::Bool,
            _ => operand.ty(),
        };
        Self::Unary {
            op,
            operand: Box::new(operand),
            ty,
        }
    }

    /// Constructs a binary operation.
    #[must_use]
    pub fn binary(op: BinaryOp, left: Expression, right: Expression) -> Self {
        let ty = if op.is_boolean() { Type::Bool } else { left.ty() };
        Self::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
            ty,
        }
    }

    /// Constructs the logical negation of `operand`.
    #[must_use]
    pub fn not(operand: Expression) -> Self {
        Self::unary(UnaryOp::Not, operand)
    }

    /// Constructs the equality comparison of `left` and `right`.
    #[must_use]
    pub fn eq(left: Expression, right: Expression) -> Self {
        Self::binary(BinaryOp::Eq, left, right)
    }

    /// Constructs the conjunction of `left` and `right`.
    #[must_use]
    pub fn and(left: Expression, right: Expression) -> Self {
        Self::binary(BinaryOp::LAnd, left, right)
    }

    /// Constructs the disjunction of `left` and `right`.
    #[must_use]
    pub fn or(left: Expression, right: Expression) -> Self {
        Self::binary(BinaryOp::LOr, left, right)
    }

    /// Constructs a conditional selection.
    #[must_use]
    pub fn mux(condition: Expression, if_true: Expression, if_false: Expression) -> Self {
        let ty = if_true.ty();
        Self::Mux {
            condition: Box::new(condition),
            if_true: Box::new(if_true),
            if_false: Box::new(if_false),
            ty,
        }
    }

    /// Constructs an aggregate literal of type `ty`.
    #[must_use]
    pub fn aggregate(components: Vec<Expression>, ty: Type) -> Self {
        Self::Aggregate { components, ty }
    }

    /// Gets the type of the expression.
    #[must_use]
    pub fn ty(&self) -> Type {
        match self {
            Self::Bool(_) => Type::Bool,
            Self::Constant { ty, .. }
            | Self::SymbolicVariable { ty, .. }
            | Self::Taint { ty }
            | Self::Path { ty, .. }
            | Self::Member { ty, .. }
            | Self::ArrayIndex { ty, .. }
            | Self::Unary { ty, .. }
            | Self::Binary { ty, .. }
            | Self::Mux { ty, .. }
            | Self::Aggregate { ty, .. } => ty.clone(),
            Self::MethodCall(call) => call.ty.clone(),
        }
    }

    /// Gets a short name for the kind of this expression for use in
    /// diagnostics.
    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Constant { .. } => "Constant",
            Self::Bool(_) => "BoolLiteral",
            Self::SymbolicVariable { .. } => "SymbolicVariable",
            Self::Taint { .. } => "TaintExpression",
            Self::Path { .. } => "PathExpression",
            Self::Member { .. } => "Member",
            Self::ArrayIndex { .. } => "ArrayIndex",
            Self::Unary { .. } => "UnaryOperation",
            Self::Binary { .. } => "BinaryOperation",
            Self::Mux { .. } => "Mux",
            Self::Aggregate { .. } => "AggregateExpression",
            Self::MethodCall(_) => "MethodCallExpression",
        }
    }

    /// Checks if the expression is a fully-evaluated symbolic value, with no
    /// pending subexpressions.
    #[must_use]
    pub fn is_symbolic_value(&self) -> bool {
        match self {
            Self::Constant { .. }
            | Self::Bool(_)
            | Self::SymbolicVariable { .. }
            | Self::Taint { .. } => true,
            Self::Unary { operand, .. } => operand.is_symbolic_value(),
            Self::Binary { left, right, .. } => {
                left.is_symbolic_value() && right.is_symbolic_value()
            }
            Self::Mux {
                condition,
                if_true,
                if_false,
                ..
            } => {
                condition.is_symbolic_value()
                    && if_true.is_symbolic_value()
                    && if_false.is_symbolic_value()
            }
            Self::Aggregate { components, .. } => components.iter().all(Self::is_symbolic_value),
            Self::Path { .. }
            | Self::Member { .. }
            | Self::ArrayIndex { .. }
            | Self::MethodCall(_) => false,
        }
    }

    /// Checks if any part of the expression is tainted.
    #[must_use]
    pub fn is_tainted(&self) -> bool {
        self.any(&mut |e| matches!(e, Self::Taint { .. }))
    }

    /// Checks if the expression denotes a storage location: a path, or a chain
    /// of member and index accesses rooted in a path.
    #[must_use]
    pub fn is_reference(&self) -> bool {
        match self {
            Self::Path { .. } => true,
            Self::Member { base, .. } | Self::ArrayIndex { base, .. } => base.is_reference(),
            _ => false,
        }
    }

    /// Gets the value of a boolean literal.
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Gets the value of a bit-vector literal.
    #[must_use]
    pub fn as_constant(&self) -> Option<U256> {
        match self {
            Self::Constant { value, .. } => Some(*value),
            _ => None,
        }
    }

    /// Gets the component of an aggregate value that corresponds to the field
    /// called `field`.
    #[must_use]
    pub fn aggregate_field(&self, field: &str) -> Option<&Expression> {
        match self {
            Self::Aggregate { components, ty } => {
                let position = ty.fields()?.iter().position(|f| f.name == field)?;
                components.get(position)
            }
            _ => None,
        }
    }

    /// Flattens nested aggregates into their scalar components, depth-first in
    /// component order.
    ///
    /// The order matches the order of the fields produced by
    /// [`crate::state::ExecutionState::get_flat_fields`] for a reference of the
    /// same type.
    #[must_use]
    pub fn flatten_components(&self) -> Vec<Expression> {
        let mut out = Vec::new();
        self.flatten_into(&mut out);
        out
    }

    fn flatten_into(&self, out: &mut Vec<Expression>) {
        match self {
            Self::Aggregate { components, .. } => {
                components.iter().for_each(|c| c.flatten_into(out));
            }
            other => out.push(other.clone()),
        }
    }

    /// Checks whether `predicate` holds for this expression or any expression
    /// nested within it.
    pub fn any(&self, predicate: &mut impl FnMut(&Expression) -> bool) -> bool {
        if predicate(self) {
            return true;
        }
        match self {
            Self::Constant { .. }
            | Self::Bool(_)
            | Self::SymbolicVariable { .. }
            | Self::Taint { .. }
            | Self::Path { .. } => false,
            Self::Member { base, .. } | Self::ArrayIndex { base, .. } => base.any(predicate),
            Self::Unary { operand, .. } => operand.any(predicate),
            Self::Binary { left, right, .. } => left.any(predicate) || right.any(predicate),
            Self::Mux {
                condition,
                if_true,
                if_false,
                ..
            } => condition.any(predicate) || if_true.any(predicate) || if_false.any(predicate),
            Self::Aggregate { components, .. } => components.iter().any(|c| c.any(predicate)),
            Self::MethodCall(call) => {
                call.receiver.as_ref().is_some_and(|r| r.any(predicate))
                    || call.args.iter().any(|a| a.any(predicate))
            }
        }
    }

    /// Rewrites the expression top-down.
    ///
    /// Wherever `rewrite` returns [`Some`], the returned expression replaces
    /// the visited one and is not visited further. Elsewhere the children are
    /// rewritten and the node is rebuilt.
    #[must_use]
    pub fn transform(&self, rewrite: &mut impl FnMut(&Expression) -> Option<Expression>) -> Self {
        if let Some(replacement) = rewrite(self) {
            return replacement;
        }
        match self {
            Self::Constant { .. }
            | Self::Bool(_)
            | Self::SymbolicVariable { .. }
            | Self::Taint { .. }
            | Self::Path { .. } => self.clone(),
            Self::Member { base, field, ty } => Self::Member {
                base:  Box::new(base.transform(rewrite)),
                field: field.clone(),
                ty:    ty.clone(),
            },
            Self::ArrayIndex { base, index, ty } => Self::ArrayIndex {
                base:  Box::new(base.transform(rewrite)),
                index: *index,
                ty:    ty.clone(),
            },
            Self::Unary { op, operand, ty } => Self::Unary {
                op:      *op,
                operand: Box::new(operand.transform(rewrite)),
                ty:      ty.clone(),
            },
            Self::Binary {
                op,
                left,
                right,
                ty,
            } => Self::Binary {
                op:    *op,
                left:  Box::new(left.transform(rewrite)),
                right: Box::new(right.transform(rewrite)),
                ty:    ty.clone(),
            },
            Self::Mux {
                condition,
                if_true,
                if_false,
                ty,
            } => Self::Mux {
                condition: Box::new(condition.transform(rewrite)),
                if_true:   Box::new(if_true.transform(rewrite)),
                if_false:  Box::new(if_false.transform(rewrite)),
                ty:        ty.clone(),
            },
            Self::Aggregate { components, ty } => Self::Aggregate {
                components: components.iter().map(|c| c.transform(rewrite)).collect(),
                ty:         ty.clone(),
            },
            Self::MethodCall(call) => Self::MethodCall(call.transform(rewrite)),
        }
    }

    /// Replaces every reference to the path `name` with `value`.
    #[must_use]
    pub fn substitute_path(&self, name: &str, value: &Expression) -> Self {
        self.transform(&mut |e| match e {
            Self::Path { name: n, .. } if n == name => Some(value.clone()),
            _ => None,
        })
    }

    /// Checks if the expression contains a reference to the path `name`.
    #[must_use]
    pub fn mentions_path(&self, name: &str) -> bool {
        self.any(&mut |e| matches!(e, Self::Path { name: n, .. } if n == name))
    }
}

impl Display for Expression {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Constant { value, ty } => match ty.width() {
                Some(w) => write!(f, "{w}w{value}"),
                None => write!(f, "{value}"),
            },
            Self::Bool(b) => write!(f, "{b}"),
            Self::SymbolicVariable { name, .. } | Self::Path { name, .. } => write!(f, "{name}"),
            Self::Taint { ty } => write!(f, "taint<{ty}>"),
            Self::Member { base, field, .. } => write!(f, "{base}.{field}"),
            Self::ArrayIndex { base, index, .. } => write!(f, "{base}[{index}]"),
            Self::Unary { op, operand, .. } => write!(f, "{}({operand})", op.symbol()),
            Self::Binary {
                op, left, right, ..
            } => write!(f, "({left} {} {right})", op.symbol()),
            Self::Mux {
                condition,
                if_true,
                if_false,
                ..
            } => write!(f, "({condition} ? {if_true} : {if_false})"),
            Self::Aggregate { components, .. } => {
                write!(f, "{{{}}}", components.iter().join(", "))
            }
            Self::MethodCall(call) => write!(f, "{call}"),
        }
    }
}

/// A call of `method`, either on a `receiver` (a table, header, stack or extern
/// instance) or as a free function or action when there is none.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct MethodCall {
    pub receiver: Option<Box<Expression>>,
    pub method:   String,
    pub args:     Vec<Expression>,

    /// The type of the value produced by the call, [`Type::Void`] if none.
    pub ty: Type,
}

impl MethodCall {
    /// Constructs a call of `method` on `receiver` with the provided `args`,
    /// producing a value of type `ty`.
    #[must_use]
    pub fn new(
        receiver: Option<Expression>,
        method: impl Into<String>,
        args: Vec<Expression>,
        ty: Type,
    ) -> Self {
        let receiver = receiver.map(Box::new);
        let method = method.into();
        Self {
            receiver,
            method,
            args,
            ty,
        }
    }

    /// Checks if the call produces a value.
    #[must_use]
    pub fn returns_value(&self) -> bool {
        self.ty != Type::Void
    }

    /// Rebuilds the call with `rewrite` applied to the receiver and arguments.
    #[must_use]
    pub fn transform(&self, rewrite: &mut impl FnMut(&Expression) -> Option<Expression>) -> Self {
        Self {
            receiver: self.receiver.as_ref().map(|r| Box::new(r.transform(rewrite))),
            method:   self.method.clone(),
            args:     self.args.iter().map(|a| a.transform(rewrite)).collect(),
            ty:       self.ty.clone(),
        }
    }

    /// Rebuilds the call with the argument at `position` replaced by `value`.
    #[must_use]
    pub fn with_arg(&self, position: usize, value: Expression) -> Self {
        let mut call = self.clone();
        if let Some(arg) = call.args.get_mut(position) {
            *arg = value;
        }
        call
    }
}

impl Display for MethodCall {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if let Some(receiver) = &self.receiver {
            write!(f, "{receiver}.")?;
        }
        write!(f, "{}({})", self.method, self.args.iter().join(", "))
    }
}

/// Masks `value` to the width of `ty`.
///
/// Types wider than 256 bits, and non-scalar types, are left untouched.
#[must_use]
pub fn mask(value: U256, ty: &Type) -> U256 {
    match ty.width() {
        Some(w) if w < 256 => value & ((U256::ONE << u32::from(w)) - U256::ONE),
        _ => value,
    }
}
