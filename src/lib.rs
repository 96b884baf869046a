pub mod cancel;
pub mod candidates;
pub mod config;
pub mod db;
pub mod divisor;
pub mod error;
pub mod factorizer;
pub mod ledger;
pub mod pairs;
pub mod primality;
pub mod progress;
pub mod store;

pub use cancel::{CancelReason, CancellationToken};
pub use error::{FactorizeError, Result};

use rug::Integer;

/// Parse a base-10 integer argument and check it lies in the factorizable domain (N >= 2).
pub fn parse_number(input: &str) -> Result<Integer> {
    let trimmed = input.trim();
    let n = Integer::from_str_radix(trimmed, 10)
        .map_err(|_| FactorizeError::InvalidInput(format!("'{}' is not a base-10 integer", trimmed)))?;
    if n < 2u32 {
        return Err(FactorizeError::InvalidInput(format!(
            "{} is out of range (must be >= 2)",
            n
        )));
    }
    Ok(n)
}

/// Estimate decimal digit count from bit length, avoiding expensive to_string conversion.
pub fn estimate_digits(n: &Integer) -> u64 {
    let bits = n.significant_bits();
    if bits == 0 {
        return 1;
    }
    (bits as f64 * std::f64::consts::LOG10_2) as u64 + 1
}

/// Product of a sequence of values (1 for an empty sequence).
pub fn product<'a, I>(values: I) -> Integer
where
    I: IntoIterator<Item = &'a Integer>,
{
    values
        .into_iter()
        .fold(Integer::from(1u32), |acc, v| acc * v)
}

/// Format the caller-facing result line: `<N> : f1,f2,...,fk`.
pub fn format_result_line(n: &Integer, factors: &[Integer]) -> String {
    let list: Vec<String> = factors.iter().map(|f| f.to_string()).collect();
    format!("{} : {}", n, list.join(","))
}
