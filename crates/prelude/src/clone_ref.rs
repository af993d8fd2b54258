//! `CloneRef`: clone for internally-mutable, reference-counted handles.

/// Clone for internal-mutable structures. This trait can be implemented only if mutating one
/// structure will be reflected in all of its clones (e.g. `Rc<RefCell<_>>` newtypes). It does not
/// mean every field needs interior mutability — an immutable field is fine, as long as nothing
/// ever mutates it through `&self`.
pub trait CloneRef: Sized {
    /// Clone the handle, sharing the underlying state.
    fn clone_ref(&self) -> Self;
}

/// Implements `CloneRef` for a type by delegating to its regular `Clone` impl. Use this for
/// newtypes over `Rc`/`Weak`/plain-old-data where `.clone()` already has reference semantics.
#[macro_export]
macro_rules! impl_clone_ref_as_clone {
    ([$($bounds:tt)*] $($toks:tt)*) => {
        impl <$($bounds)*> $crate::CloneRef for $($toks)* {
            fn clone_ref(&self) -> Self {
                self.clone()
            }
        }
    };
    ($($toks:tt)*) => {
        impl $crate::CloneRef for $($toks)* {
            fn clone_ref(&self) -> Self {
                self.clone()
            }
        }
    };
}

impl_clone_ref_as_clone!([T:?Sized] std::rc::Rc<T>);
impl_clone_ref_as_clone!([T:?Sized] std::rc::Weak<T>);
impl_clone_ref_as_clone!(());
impl_clone_ref_as_clone!(usize);
impl_clone_ref_as_clone!(u32);
impl_clone_ref_as_clone!(i32);
impl_clone_ref_as_clone!(bool);
