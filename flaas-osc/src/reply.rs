//! Typed access to OSC reply arguments
//!
//! AbletonOSC replies are positional argument lists. Business code never sees
//! them: each accessor here checks position and type once and returns a plain
//! Rust value or an [`OscError::UnexpectedReply`].

use crate::error::{OscError, Result};
use rosc::OscType;

/// One reply message received from the remote end
#[derive(Debug, Clone, PartialEq)]
pub struct OscReply {
    /// OSC address pattern of the reply
    pub address: String,
    /// Raw arguments, in order
    pub args: Vec<OscType>,
}

impl OscReply {
    pub fn new(address: impl Into<String>, args: Vec<OscType>) -> Self {
        Self {
            address: address.into(),
            args,
        }
    }

    pub fn len(&self) -> usize {
        self.args.len()
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }

    fn unexpected(&self, detail: String) -> OscError {
        OscError::UnexpectedReply {
            address: self.address.clone(),
            detail,
        }
    }

    fn arg(&self, index: usize) -> Result<&OscType> {
        self.args.get(index).ok_or_else(|| {
            self.unexpected(format!(
                "missing argument {} (reply has {})",
                index,
                self.args.len()
            ))
        })
    }

    /// Integer argument (floats with an integral value are accepted)
    pub fn int(&self, index: usize) -> Result<i32> {
        match self.arg(index)? {
            OscType::Int(v) => Ok(*v),
            OscType::Long(v) => i32::try_from(*v)
                .map_err(|_| self.unexpected(format!("argument {} out of i32 range", index))),
            OscType::Float(v) if v.fract() == 0.0 => Ok(*v as i32),
            other => Err(self.unexpected(format!("argument {} is not an int: {:?}", index, other))),
        }
    }

    /// Numeric argument widened to f64
    pub fn float(&self, index: usize) -> Result<f64> {
        as_f64(self.arg(index)?)
            .ok_or_else(|| self.unexpected(format!("argument {} is not numeric", index)))
    }

    /// String argument
    pub fn string(&self, index: usize) -> Result<String> {
        match self.arg(index)? {
            OscType::String(s) => Ok(s.clone()),
            other => Err(self.unexpected(format!("argument {} is not a string: {:?}", index, other))),
        }
    }

    /// Last argument as f64
    pub fn last_float(&self) -> Result<f64> {
        if self.args.is_empty() {
            return Err(self.unexpected("reply has no arguments".to_string()));
        }
        self.float(self.args.len() - 1)
    }

    /// All arguments from `start` on, as strings (numbers are formatted)
    pub fn strings_from(&self, start: usize) -> Vec<String> {
        self.args
            .iter()
            .skip(start)
            .map(|a| match a {
                OscType::String(s) => s.clone(),
                other => as_f64(other)
                    .map(|v| v.to_string())
                    .unwrap_or_else(|| format!("{:?}", other)),
            })
            .collect()
    }

    /// All arguments from `start` on, as f64
    pub fn floats_from(&self, start: usize) -> Result<Vec<f64>> {
        self.args
            .iter()
            .enumerate()
            .skip(start)
            .map(|(i, a)| {
                as_f64(a).ok_or_else(|| self.unexpected(format!("argument {} is not numeric", i)))
            })
            .collect()
    }

    /// All arguments from `start` on, as booleans (ints are nonzero-true)
    pub fn bools_from(&self, start: usize) -> Result<Vec<bool>> {
        self.args
            .iter()
            .enumerate()
            .skip(start)
            .map(|(i, a)| match a {
                OscType::Bool(b) => Ok(*b),
                OscType::Int(v) => Ok(*v != 0),
                OscType::Long(v) => Ok(*v != 0),
                OscType::Float(v) => Ok(*v != 0.0),
                other => Err(self.unexpected(format!("argument {} is not a bool: {:?}", i, other))),
            })
            .collect()
    }
}

fn as_f64(arg: &OscType) -> Option<f64> {
    match arg {
        OscType::Float(v) => Some(*v as f64),
        OscType::Double(v) => Some(*v),
        OscType::Int(v) => Some(*v as f64),
        OscType::Long(v) => Some(*v as f64),
        OscType::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reply(args: Vec<OscType>) -> OscReply {
        OscReply::new("/live/device/get/parameters/min", args)
    }

    #[test]
    fn test_int_and_float_coercion() {
        let r = reply(vec![OscType::Int(3), OscType::Float(2.0), OscType::Double(-1.5)]);
        assert_eq!(r.int(0).unwrap(), 3);
        assert_eq!(r.int(1).unwrap(), 2);
        assert_eq!(r.float(0).unwrap(), 3.0);
        assert_eq!(r.float(2).unwrap(), -1.5);
        assert!(r.int(2).is_err());
    }

    #[test]
    fn test_missing_argument_is_unexpected_reply() {
        let r = reply(vec![OscType::Int(0)]);
        match r.float(4) {
            Err(OscError::UnexpectedReply { address, detail }) => {
                assert_eq!(address, "/live/device/get/parameters/min");
                assert!(detail.contains("missing argument 4"));
            }
            other => panic!("expected UnexpectedReply, got {:?}", other),
        }
    }

    #[test]
    fn test_tail_accessors() {
        let r = reply(vec![
            OscType::Int(0),
            OscType::Int(2),
            OscType::Float(-60.0),
            OscType::Int(0),
            OscType::Bool(true),
        ]);
        assert_eq!(r.floats_from(2).unwrap(), vec![-60.0, 0.0, 1.0]);
        assert_eq!(r.bools_from(3).unwrap(), vec![false, true]);
        assert_eq!(r.last_float().unwrap(), 1.0);
    }

    #[test]
    fn test_strings_from_formats_numbers() {
        let r = reply(vec![OscType::Int(1), OscType::String("Limiter".into()), OscType::Int(7)]);
        assert_eq!(r.strings_from(1), vec!["Limiter".to_string(), "7".to_string()]);
    }

    #[test]
    fn test_non_numeric_tail_is_error() {
        let r = reply(vec![OscType::Int(0), OscType::String("x".into())]);
        assert!(r.floats_from(1).is_err());
    }
}
