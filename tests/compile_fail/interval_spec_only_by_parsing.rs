// ABOUTME: Compile-fail test verifying IntervalSpec cannot be built without parsing.
// ABOUTME: This test should fail to compile, validating type safety.

use pullwise::types::IntervalSpec;

fn main() {
    let _spec = IntervalSpec {
        raw: "forever".to_string(),
        duration: chrono::TimeDelta::zero(),
    }; // ERROR: fields of IntervalSpec are private
}
