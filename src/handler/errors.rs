//! Declared error sets.
//!
//! A version declares the application errors it may return through an
//! errors-var: a `static` struct of [`ErrorSlot`]s built with
//! [`errors_var!`](crate::errors_var). The field name becomes the error
//! code, the literal its message. Registration validates the set, binds
//! every slot to its resolved [`HandlerError`] and stores the list on the
//! version for documentation.
//!
//! # Example
//!
//! ```ignore
//! errors_var! {
//!     pub struct V2Errors {
//!         NOT_FOUND = "User not found",
//!         BANNED = "User is banned",
//!     }
//! }
//!
//! static V2_ERRORS: V2Errors = V2Errors::new();
//!
//! // inside the V2 method:
//! return Err(V2_ERRORS.NOT_FOUND.error().into());
//! ```

use parking_lot::RwLock;

use crate::error::HandlerError;

/// One declared error.
#[derive(Debug)]
pub struct ErrorSlot {
    code: &'static str,
    text: &'static str,
    bound: RwLock<Option<HandlerError>>,
}

impl ErrorSlot {
    pub const fn new(code: &'static str, text: &'static str) -> Self {
        Self {
            code,
            text,
            bound: parking_lot::const_rwlock(None),
        }
    }

    #[inline]
    pub fn code(&self) -> &'static str {
        self.code
    }

    #[inline]
    pub fn text(&self) -> &'static str {
        self.text
    }

    /// The bound error, or one built from the declaration if the owning
    /// handler has not been registered yet.
    pub fn error(&self) -> HandlerError {
        self.bound
            .read()
            .clone()
            .unwrap_or_else(|| HandlerError::new(self.code, self.text))
    }

    pub fn is_bound(&self) -> bool {
        self.bound.read().is_some()
    }

    /// Last registration wins.
    pub(crate) fn bind(&self, error: HandlerError) {
        *self.bound.write() = Some(error);
    }
}

/// A set of declared errors.
pub trait ErrorsVar: Send + Sync {
    fn slots(&self) -> Vec<&ErrorSlot>;
}

/// Defines an errors-var struct.
///
/// The generated struct has one public [`ErrorSlot`] per entry and a
/// `const fn new()`, so instances can live in a `static`.
#[macro_export]
macro_rules! errors_var {
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident {
            $($code:ident = $text:literal),* $(,)?
        }
    ) => {
        $(#[$meta])*
        #[allow(non_snake_case)]
        $vis struct $name {
            $(pub $code: $crate::handler::ErrorSlot,)*
        }

        impl $name {
            pub const fn new() -> Self {
                Self {
                    $($code: $crate::handler::ErrorSlot::new(stringify!($code), $text),)*
                }
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl $crate::handler::ErrorsVar for $name {
            fn slots(&self) -> Vec<&$crate::handler::ErrorSlot> {
                vec![$(&self.$code),*]
            }
        }
    };
}
