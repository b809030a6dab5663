//! This module contains the persistent lexical scope chain used for name
//! resolution.
//!
//! Scopes are immutable once created and are shared between forked states by
//! reference counting. Pushing a scope allocates a new link that points at its
//! parent; popping only moves the head pointer. Ancestor scopes are therefore
//! never mutated, and a clone of a state only copies the head pointer.

use std::{collections::HashMap, rc::Rc};

use crate::{
    error::execution::Error,
    ir::{Declaration, Type},
};

/// A single lexical scope.
#[derive(Debug, Eq, PartialEq)]
pub struct Scope {
    declarations: HashMap<String, Declaration>,
    parent:       Option<Rc<Scope>>,
}

impl Scope {
    /// Gets the declaration called `name` in this scope or any enclosing scope.
    #[must_use]
    pub fn find(&self, name: &str) -> Option<&Declaration> {
        let mut current = Some(self);
        while let Some(scope) = current {
            if let Some(decl) = scope.declarations.get(name) {
                return Some(decl);
            }
            current = scope.parent.as_deref();
        }
        None
    }
}

/// A pointer to the innermost scope of a chain.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ScopeChain {
    head: Option<Rc<Scope>>,
}

impl ScopeChain {
    /// Gets a new chain with a scope containing `declarations` on top of this
    /// one.
    ///
    /// Later declarations of the same name shadow earlier ones.
    #[must_use]
    pub fn push(&self, declarations: impl IntoIterator<Item = Declaration>) -> Self {
        let declarations = declarations.into_iter().map(|d| (d.name().to_string(), d)).collect();
        let parent = self.head.clone();
        Self {
            head: Some(Rc::new(Scope {
                declarations,
                parent,
            })),
        }
    }

    /// Gets the chain without its innermost scope, or [`None`] if the chain is
    /// empty.
    #[must_use]
    pub fn pop(&self) -> Option<Self> {
        self.head.as_ref().map(|scope| Self {
            head: scope.parent.clone(),
        })
    }

    /// Gets the declaration called `name`, searching from the innermost scope
    /// outwards.
    #[must_use]
    pub fn find(&self, name: &str) -> Option<&Declaration> {
        self.head.as_deref().and_then(|scope| scope.find(name))
    }

    /// Gets the number of scopes in the chain.
    #[must_use]
    pub fn depth(&self) -> usize {
        let mut depth = 0;
        let mut current = self.head.as_deref();
        while let Some(scope) = current {
            depth += 1;
            current = scope.parent.as_deref();
        }
        depth
    }
}

/// The namespace context of an execution state: the active scope chain plus
/// the generator of fresh names.
///
/// The generator is owned by the context, so forked states generate names
/// independently of one another. It is never rolled back when scopes are
/// popped, so names stay unique along a whole execution path.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct NamespaceContext {
    scopes:     ScopeChain,
    next_fresh: u64,
}

impl NamespaceContext {
    /// Pushes a scope containing `declarations`.
    pub fn push(&mut self, declarations: impl IntoIterator<Item = Declaration>) {
        self.scopes = self.scopes.push(declarations);
    }

    /// Pops the innermost scope.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if there is no scope to pop.
    pub fn pop(&mut self) -> Result<(), Error> {
        self.scopes = self
            .scopes
            .pop()
            .ok_or(Error::EmptyNamespace)?;
        Ok(())
    }

    /// Gets the active scope chain.
    #[must_use]
    pub fn scopes(&self) -> &ScopeChain {
        &self.scopes
    }

    /// Replaces the active scope chain, leaving the name generator untouched.
    pub fn restore(&mut self, scopes: ScopeChain) {
        self.scopes = scopes;
    }

    /// Gets the declaration called `name`.
    #[must_use]
    pub fn find_decl(&self, name: &str) -> Option<&Declaration> {
        self.scopes.find(name)
    }

    /// Resolves named types to their definitions.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if a named type is not declared.
    pub fn resolve_type(&self, ty: &Type) -> Result<Type, Error> {
        let mut current = ty.clone();
        // Bounded so that cyclic aliases fail instead of looping.
        for _ in 0..64 {
            let Type::Named(name) = &current else {
                return Ok(current);
            };
            match self.find_decl(name) {
                Some(Declaration::Type { ty, .. }) => current = ty.clone(),
                _ => return Err(Error::UnresolvedName { name: name.clone() }),
            }
        }
        Err(Error::UnresolvedName {
            name: ty.to_string(),
        })
    }

    /// Generates a name starting with `prefix` that has not been generated
    /// before in this context.
    #[must_use]
    pub fn fresh_name(&mut self, prefix: &str) -> String {
        let name = format!("{prefix}{}", self.next_fresh);
        self.next_fresh += 1;
        name
    }
}
