//! This module contains the type language of the program representation.

use std::{
    fmt::{Display, Formatter},
    rc::Rc,
};

use itertools::Itertools;

/// The type of an expression or storage location in the program.
///
/// Composite types share their field lists through [`Rc`] so that types can be
/// cloned freely into every flattened state variable.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum Type {
    /// The boolean type.
    Bool,

    /// A fixed-width bit-vector, `bit<W>` or `int<W>`.
    Bits { width: u16, signed: bool },

    /// A struct type.
    Struct(Rc<Composite>),

    /// A header type, which carries an implicit validity bit in addition to
    /// its declared fields.
    Header(Rc<Composite>),

    /// A header union, whose members are all headers and at most one of which
    /// is valid at any time.
    HeaderUnion(Rc<Composite>),

    /// A fixed-size array of `size` elements of type `element`.
    Stack { element: Rc<Type>, size: usize },

    /// A reference to a type declared by name, resolved through the namespace.
    Named(String),

    /// The absence of a value.
    Void,
}

impl Type {
    /// Constructs the unsigned `bit<width>` type.
    #[must_use]
    pub fn bits(width: u16) -> Self {
        Self::Bits {
            width,
            signed: false,
        }
    }

    /// Constructs the signed `int<width>` type.
    #[must_use]
    pub fn int(width: u16) -> Self {
        Self::Bits {
            width,
            signed: true,
        }
    }

    /// Constructs a struct type named `name` with the provided `fields`.
    #[must_use]
    pub fn structure(name: impl Into<String>, fields: Vec<Field>) -> Self {
        Self::Struct(Rc::new(Composite::new(name, fields)))
    }

    /// Constructs a header type named `name` with the provided `fields`.
    #[must_use]
    pub fn header(name: impl Into<String>, fields: Vec<Field>) -> Self {
        Self::Header(Rc::new(Composite::new(name, fields)))
    }

    /// Constructs a header union type named `name` with the provided header
    /// `members`.
    #[must_use]
    pub fn header_union(name: impl Into<String>, members: Vec<Field>) -> Self {
        Self::HeaderUnion(Rc::new(Composite::new(name, members)))
    }

    /// Constructs a header stack of `size` elements of type `element`.
    #[must_use]
    pub fn stack(element: Type, size: usize) -> Self {
        Self::Stack {
            element: Rc::new(element),
            size,
        }
    }

    /// Checks if values of this type are made up of more than one storage
    /// cell.
    ///
    /// Named types are conservatively reported as not structured, so callers
    /// must resolve them first.
    #[must_use]
    pub fn is_structured(&self) -> bool {
        matches!(
            self,
            Self::Struct(_) | Self::Header(_) | Self::HeaderUnion(_) | Self::Stack { .. }
        )
    }

    /// Checks if this is a header type.
    #[must_use]
    pub fn is_header(&self) -> bool {
        matches!(self, Self::Header(_))
    }

    /// Checks if this is a header union type.
    #[must_use]
    pub fn is_header_union(&self) -> bool {
        matches!(self, Self::HeaderUnion(_))
    }

    /// Gets the fields of a composite type, if this is one.
    #[must_use]
    pub fn fields(&self) -> Option<&[Field]> {
        match self {
            Self::Struct(c) | Self::Header(c) | Self::HeaderUnion(c) => Some(c.fields.as_slice()),
            _ => None,
        }
    }

    /// Gets the type of the field called `name`, if this is a composite type
    /// that has such a field.
    #[must_use]
    pub fn field_type(&self, name: &str) -> Option<&Type> {
        self.fields()?.iter().find(|f| f.name == name).map(|f| &f.ty)
    }

    /// Gets the bit-width of a scalar type.
    ///
    /// Booleans are one bit wide.
    #[must_use]
    pub fn width(&self) -> Option<u16> {
        match self {
            Self::Bool => Some(1),
            Self::Bits { width, .. } => Some(*width),
            _ => None,
        }
    }

    /// Checks if this is a signed bit-vector type.
    #[must_use]
    pub fn is_signed(&self) -> bool {
        matches!(self, Self::Bits { signed: true, .. })
    }
}

impl Display for Type {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bool => write!(f, "bool"),
            Self::Bits {
                width,
                signed: false,
            } => write!(f, "bit<{width}>"),
            Self::Bits {
                width,
                signed: true,
            } => write!(f, "int<{width}>"),
            Self::Struct(c) | Self::Header(c) | Self::HeaderUnion(c) => write!(f, "{}", c.name),
            Self::Stack { element, size } => write!(f, "{element}[{size}]"),
            Self::Named(name) => write!(f, "{name}"),
            Self::Void => write!(f, "void"),
        }
    }
}

/// The body of a struct, header or header union type.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct Composite {
    /// The declared name of the type.
    pub name: String,

    /// The fields in declaration order.
    pub fields: Vec<Field>,
}

impl Composite {
    /// Constructs a new composite type body.
    #[must_use]
    pub fn new(name: impl Into<String>, fields: Vec<Field>) -> Self {
        let name = name.into();
        Self { name, fields }
    }
}

impl Display for Composite {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let fields = self.fields.iter().map(|fd| format!("{} {}", fd.ty, fd.name)).join("; ");
        write!(f, "{} {{ {fields} }}", self.name)
    }
}

/// A named field of a composite type.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct Field {
    pub name: String,
    pub ty:   Type,
}

impl Field {
    /// Constructs a new field called `name` of type `ty`.
    #[must_use]
    pub fn new(name: impl Into<String>, ty: Type) -> Self {
        let name = name.into();
        Self { name, ty }
    }
}

#[cfg(test)]
mod test {
    use crate::ir::types::{Field, Type};

    #[test]
    fn can_query_composite_fields() {
        let eth = Type::header(
            "ethernet_t",
            vec![
                Field::new("dst", Type::bits(48)),
                Field::new("src", Type::bits(48)),
                Field::new("ether_type", Type::bits(16)),
            ],
        );

        assert!(eth.is_structured());
        assert!(eth.is_header());
        assert_eq!(eth.field_type("ether_type"), Some(&Type::bits(16)));
        assert_eq!(eth.field_type("vlan"), None);
        assert_eq!(format!("{}", Type::stack(eth, 4)), "ethernet_t[4]");
    }

    #[test]
    fn scalars_have_widths() {
        assert_eq!(Type::Bool.width(), Some(1));
        assert_eq!(Type::int(8).width(), Some(8));
        assert!(Type::int(8).is_signed());
        assert!(!Type::bits(8).is_structured());
        assert_eq!(Type::Void.width(), None);
    }
}
