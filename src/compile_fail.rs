//! Contains a set of compile failure doctests.

// -----------------------------------------------------------------------------
// Ensures task bodies cannot capture their environment.

/** ```compile_fail,E0308

use spindle::{Config, Runtime};

let runtime = Runtime::new(Config::new(1).unwrap()).unwrap();
let group = runtime.create_group().unwrap();

let captured = vec![1, 2, 3];
runtime.spawn(group, move |_| { drop(captured); Ok(()) }, &[]); //~ ERROR

``` */
mod capturing_body {}

// -----------------------------------------------------------------------------
// Ensures outlined bodies cannot be spawned without `unsafe`.

/** ```compile_fail,E0133

use core::ffi::c_void;
use spindle::{ArgSchema, Config, Runtime};

unsafe extern "C-unwind" fn body(_args: *mut c_void) {}

let runtime = Runtime::new(Config::new(1).unwrap()).unwrap();
let group = runtime.create_group().unwrap();
runtime.spawn_outlined(group, body, &[], &ArgSchema::new()); //~ ERROR

``` */
mod outlined_needs_unsafe {}

// -----------------------------------------------------------------------------
// Ensures outlined bodies use an unwinding ABI.

/** ```compile_fail,E0308

use core::ffi::c_void;
use spindle::{ArgSchema, Config, Runtime};

unsafe extern "C" fn body(_args: *mut c_void) {}

let runtime = Runtime::new(Config::new(1).unwrap()).unwrap();
let group = runtime.create_group().unwrap();
unsafe { runtime.spawn_outlined(group, body, &[], &ArgSchema::new()) }; //~ ERROR

``` */
mod outlined_needs_unwind_abi {}

// -----------------------------------------------------------------------------
// Ensures group handles cannot be forged from integers.

/** ```compile_fail,E0423

use spindle::GroupHandle;

let handle = GroupHandle(1); //~ ERROR

``` */
mod forged_handle {}
