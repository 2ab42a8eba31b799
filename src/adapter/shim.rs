//! Compile-time trampolines for helpers written in Rust.
//!
//! [`trampoline!`](crate::trampoline) is the Rust counterpart of the C shape
//! macros: it expands to one concrete `extern "C"` function with the
//! interpreter's ten-slot signature for each helper it is given.
//!
//! ```
//! use unicorn_patcher::trampoline;
//!
//! fn add(a: u32, b: u32) -> u32 {
//!     a.wrapping_add(b)
//! }
//!
//! trampoline!(fn tramp_add => add(u32, u32) -> u32);
//!
//! assert_eq!(tramp_add(2, 3, 9, 9, 9, 9, 9, 9, 9, 9), 5);
//! ```

/// The interpreter's single helper call shape.
pub type TransportFn = extern "C" fn(u64, u64, u64, u64, u64, u64, u64, u64, u64, u64) -> u64;

/// Value returned by trampolines whose helper returns nothing.
pub const VOID_SENTINEL: u64 = 0;

/// Define a ten-slot trampoline around a typed helper.
///
/// `trampoline!(pub fn name => helper(T1, ..., Tn) -> R)` narrows the first
/// `n` slots with `as` casts, calls `helper`, and widens the result. Without
/// `-> R` the helper's result is discarded and [`VOID_SENTINEL`] is
/// returned. Helpers with more than five parameters are rejected at compile
/// time.
#[macro_export]
macro_rules! trampoline {
    (@arity $($ty:ty),*) => {
        const _: () = assert!(
            <[&str]>::len(&[$(stringify!($ty)),*]) <= $crate::adapter::MAX_ARITY,
            "trampolines support at most five helper parameters"
        );
    };
    ($vis:vis fn $tramp:ident => $helper:ident($($ty:ty),* $(,)?) -> $ret:ty) => {
        #[allow(clippy::too_many_arguments, unused_variables, unused_mut)]
        $vis extern "C" fn $tramp(
            a0: u64, a1: u64, a2: u64, a3: u64, a4: u64,
            a5: u64, a6: u64, a7: u64, a8: u64, a9: u64,
        ) -> u64 {
            $crate::trampoline!(@arity $($ty),*);
            let mut slots = [a0, a1, a2, a3, a4, a5, a6, a7, a8, a9].into_iter();
            let result: $ret = $helper($(slots.next().unwrap_or(0) as $ty),*);
            result as u64
        }
    };
    ($vis:vis fn $tramp:ident => $helper:ident($($ty:ty),* $(,)?)) => {
        #[allow(clippy::too_many_arguments, unused_variables, unused_mut)]
        $vis extern "C" fn $tramp(
            a0: u64, a1: u64, a2: u64, a3: u64, a4: u64,
            a5: u64, a6: u64, a7: u64, a8: u64, a9: u64,
        ) -> u64 {
            $crate::trampoline!(@arity $($ty),*);
            let mut slots = [a0, a1, a2, a3, a4, a5, a6, a7, a8, a9].into_iter();
            $helper($(slots.next().unwrap_or(0) as $ty),*);
            $crate::adapter::shim::VOID_SENTINEL
        }
    };
}
