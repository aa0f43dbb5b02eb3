// Copyright 2023 the orestone authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

use anyhow::Error;
use std::panic::AssertUnwindSafe;

/// Wrapper for handlers, eventually used for accounting, error handling, etc.
/// Currently just converts panics into errors so a misbehaving map generator
/// fails one job instead of the whole worker thread.
#[inline]
pub(crate) fn run_handler_impl<T, F>(closure: F, name: &str) -> anyhow::Result<T>
where
    F: FnOnce() -> anyhow::Result<T>,
{
    // todo clean up AssertUnwindSafe if possible
    match std::panic::catch_unwind(AssertUnwindSafe(closure)) {
        Ok(x) => x,
        Err(_e) => Err(Error::msg(format!("Handler {} panicked", name))),
    }
}

#[macro_export]
macro_rules! run_handler {
    ($closure:expr, $name:literal $(,)?) => {{
        let _span = tracy_client::span!(concat!($name, " handler"));
        $crate::game_state::handlers::run_handler_impl($closure, $name)
    }};
}

#[cfg(test)]
mod tests {
    #[test]
    fn test_panic_becomes_error() {
        let result: anyhow::Result<()> =
            run_handler!(|| panic!("deliberate test panic"), "test");
        assert!(result.unwrap_err().to_string().contains("panicked"));
    }

    #[test]
    fn test_ok_passthrough() {
        let result = run_handler!(|| Ok(42), "test");
        assert_eq!(result.unwrap(), 42);
    }
}
