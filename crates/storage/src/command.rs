//! Store commands and replies
//!
//! The downstream contract is a Redis-like command set. Commands are plain
//! data so they can be queued in a [`Pipeline`](crate::Pipeline) and executed
//! in one round trip; replies come back in submission order.

use redmap_core::{Error, Result};
use std::ops::Bound;

/// One store command
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// GET key
    Get {
        /// Key
        key: String,
    },
    /// SET key value
    Set {
        /// Key
        key: String,
        /// Value
        value: Vec<u8>,
    },
    /// SETNX key value (1 if set, 0 if the key already existed)
    SetNx {
        /// Key
        key: String,
        /// Value
        value: Vec<u8>,
    },
    /// EXISTS key
    Exists {
        /// Key
        key: String,
    },
    /// DEL key [key ...]
    Del {
        /// Keys
        keys: Vec<String>,
    },
    /// INCR key
    Incr {
        /// Key
        key: String,
    },
    /// KEYS pattern
    Keys {
        /// Glob pattern (`*`, `?`)
        pattern: String,
    },
    /// RPUSH key value [value ...]
    RPush {
        /// Key
        key: String,
        /// Values, pushed in order
        values: Vec<Vec<u8>>,
    },
    /// LRANGE key start stop
    LRange {
        /// Key
        key: String,
        /// First index (negative counts from the end)
        start: i64,
        /// Last index, inclusive (negative counts from the end)
        stop: i64,
    },
    /// HSET key field value [field value ...]
    HSet {
        /// Key
        key: String,
        /// Field/value pairs
        fields: Vec<(Vec<u8>, Vec<u8>)>,
    },
    /// HGET key field
    HGet {
        /// Key
        key: String,
        /// Field
        field: Vec<u8>,
    },
    /// HGETALL key
    HGetAll {
        /// Key
        key: String,
    },
    /// HDEL key field [field ...]
    HDel {
        /// Key
        key: String,
        /// Fields
        fields: Vec<Vec<u8>>,
    },
    /// ZADD key [NX] score member
    ZAdd {
        /// Key
        key: String,
        /// Score
        score: f64,
        /// Member
        member: String,
        /// Only add, never update an existing score
        nx: bool,
    },
    /// ZREM key member
    ZRem {
        /// Key
        key: String,
        /// Member
        member: String,
    },
    /// ZRANGE / ZREVRANGE key start stop
    ZRange {
        /// Key
        key: String,
        /// First rank
        start: i64,
        /// Last rank, inclusive
        stop: i64,
        /// Descending order
        rev: bool,
    },
    /// ZRANGEBYSCORE / ZREVRANGEBYSCORE key min max
    ZRangeByScore {
        /// Key
        key: String,
        /// Lower score bound
        min: Bound<f64>,
        /// Upper score bound
        max: Bound<f64>,
        /// Descending order
        rev: bool,
    },
    /// ZRANK / ZREVRANK key member
    ZRank {
        /// Key
        key: String,
        /// Member
        member: String,
        /// Rank in descending order
        rev: bool,
    },
    /// ZSCORE key member
    ZScore {
        /// Key
        key: String,
        /// Member
        member: String,
    },
    /// ZCARD key
    ZCard {
        /// Key
        key: String,
    },
    /// ZREMRANGEBYRANK key start stop
    ZRemRangeByRank {
        /// Key
        key: String,
        /// First rank
        start: i64,
        /// Last rank, inclusive
        stop: i64,
    },
}

impl Command {
    /// Command name, for logs
    pub fn name(&self) -> &'static str {
        match self {
            Command::Get { .. } => "GET",
            Command::Set { .. } => "SET",
            Command::SetNx { .. } => "SETNX",
            Command::Exists { .. } => "EXISTS",
            Command::Del { .. } => "DEL",
            Command::Incr { .. } => "INCR",
            Command::Keys { .. } => "KEYS",
            Command::RPush { .. } => "RPUSH",
            Command::LRange { .. } => "LRANGE",
            Command::HSet { .. } => "HSET",
            Command::HGet { .. } => "HGET",
            Command::HGetAll { .. } => "HGETALL",
            Command::HDel { .. } => "HDEL",
            Command::ZAdd { .. } => "ZADD",
            Command::ZRem { .. } => "ZREM",
            Command::ZRange { rev: false, .. } => "ZRANGE",
            Command::ZRange { rev: true, .. } => "ZREVRANGE",
            Command::ZRangeByScore { rev: false, .. } => "ZRANGEBYSCORE",
            Command::ZRangeByScore { rev: true, .. } => "ZREVRANGEBYSCORE",
            Command::ZRank { rev: false, .. } => "ZRANK",
            Command::ZRank { rev: true, .. } => "ZREVRANK",
            Command::ZScore { .. } => "ZSCORE",
            Command::ZCard { .. } => "ZCARD",
            Command::ZRemRangeByRank { .. } => "ZREMRANGEBYRANK",
        }
    }
}

/// Reply to one command
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// Missing value
    Nil,
    /// Simple status (`OK`)
    Status(String),
    /// Integer reply
    Integer(i64),
    /// Bulk string
    Bulk(Vec<u8>),
    /// Multi-bulk reply
    Array(Vec<Reply>),
    /// Command-level error (e.g. WRONGTYPE)
    Error(String),
}

impl Reply {
    /// `OK` status
    pub fn ok() -> Self {
        Reply::Status("OK".to_string())
    }

    /// Turn a command-level error reply into `Error::Store`
    pub fn into_result(self) -> Result<Reply> {
        match self {
            Reply::Error(msg) => Err(Error::store(msg)),
            other => Ok(other),
        }
    }

    /// Integer reply
    pub fn into_integer(self) -> Result<i64> {
        match self.into_result()? {
            Reply::Integer(i) => Ok(i),
            other => Err(unexpected("integer", &other)),
        }
    }

    /// Integer reply read as a boolean (non-zero = true)
    pub fn into_bool(self) -> Result<bool> {
        Ok(self.into_integer()? != 0)
    }

    /// Bulk reply, `None` for nil
    pub fn into_bytes(self) -> Result<Option<Vec<u8>>> {
        match self.into_result()? {
            Reply::Nil => Ok(None),
            Reply::Bulk(b) => Ok(Some(b)),
            other => Err(unexpected("bulk", &other)),
        }
    }

    /// Bulk reply as UTF-8, `None` for nil
    pub fn into_string(self) -> Result<Option<String>> {
        match self.into_bytes()? {
            None => Ok(None),
            Some(b) => String::from_utf8(b)
                .map(Some)
                .map_err(|e| Error::store(format!("non UTF-8 reply: {}", e))),
        }
    }

    /// Bulk reply parsed as a score, `None` for nil
    pub fn into_score(self) -> Result<Option<f64>> {
        match self.into_string()? {
            None => Ok(None),
            Some(s) => s
                .parse()
                .map(Some)
                .map_err(|_| Error::store(format!("invalid score reply '{}'", s))),
        }
    }

    /// Integer reply, `None` for nil (ZRANK on a missing member)
    pub fn into_optional_integer(self) -> Result<Option<i64>> {
        match self.into_result()? {
            Reply::Nil => Ok(None),
            Reply::Integer(i) => Ok(Some(i)),
            other => Err(unexpected("integer", &other)),
        }
    }

    /// Multi-bulk reply of raw items
    pub fn into_bytes_array(self) -> Result<Vec<Vec<u8>>> {
        match self.into_result()? {
            Reply::Array(items) => items
                .into_iter()
                .map(|item| match item {
                    Reply::Bulk(b) => Ok(b),
                    other => Err(unexpected("bulk item", &other)),
                })
                .collect(),
            other => Err(unexpected("array", &other)),
        }
    }

    /// Multi-bulk reply of UTF-8 strings
    pub fn into_string_array(self) -> Result<Vec<String>> {
        self.into_bytes_array()?
            .into_iter()
            .map(|b| {
                String::from_utf8(b).map_err(|e| Error::store(format!("non UTF-8 reply: {}", e)))
            })
            .collect()
    }

    /// Multi-bulk reply of alternating field/value items (HGETALL)
    pub fn into_pairs(self) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let items = self.into_bytes_array()?;
        if items.len() % 2 != 0 {
            return Err(Error::store("odd number of items in pair reply"));
        }
        let mut pairs = Vec::with_capacity(items.len() / 2);
        let mut iter = items.into_iter();
        while let (Some(k), Some(v)) = (iter.next(), iter.next()) {
            pairs.push((k, v));
        }
        Ok(pairs)
    }
}

fn unexpected(expected: &str, got: &Reply) -> Error {
    Error::store(format!("expected {} reply, got {:?}", expected, got))
}
