//! `abi_fn!`: exported `extern "C"` entry points that never unwind into C.

/// Generate a `#[unsafe(no_mangle)] pub unsafe extern "C" fn` whose body runs
/// under `catch_unwind`. A panic inside the body returns the fallback given
/// after `=` instead of crossing the boundary.
///
/// ```ignore
/// abi_fn! {
///     /// Doc comment for the function.
///     fn bk_mem_thing(bytes: u32) -> *mut c_void = std::ptr::null_mut(); {
///         // body, already in an unsafe context
///     }
/// }
/// ```
///
/// Without a return type the fallback is `()` and is omitted.
#[allow(unused_macros)]
macro_rules! abi_fn {
    (
        $(#[$meta:meta])*
        fn $name:ident( $($arg:ident : $argty:ty),* $(,)? ) -> $ret:ty = $fallback:expr;
        $body:block
    ) => {
        $(#[$meta])*
        #[unsafe(no_mangle)]
        pub unsafe extern "C" fn $name( $($arg : $argty),* ) -> $ret {
            ::std::panic::catch_unwind(::std::panic::AssertUnwindSafe(|| unsafe { $body }))
                .unwrap_or($fallback)
        }
    };

    (
        $(#[$meta:meta])*
        fn $name:ident( $($arg:ident : $argty:ty),* $(,)? )
        $body:block
    ) => {
        $(#[$meta])*
        #[unsafe(no_mangle)]
        pub unsafe extern "C" fn $name( $($arg : $argty),* ) {
            let _ = ::std::panic::catch_unwind(::std::panic::AssertUnwindSafe(|| unsafe { $body }));
        }
    };
}

#[allow(unused_imports)]
pub(crate) use abi_fn;
