// ABOUTME: Compile-fail test verifying LedgerKey is only built from an image reference.
// ABOUTME: This test should fail to compile, validating type safety.

use pullwise::ledger::LedgerKey;

fn main() {
    let _key = LedgerKey("alpine".to_string()); // ERROR: private tuple field
}
