//! Parses a request's argument vector into a typed [`Command`] and routes
//! it to the matching [`Keyspace`] method.
//!
//! Arity checking and argument-shape validation (integers where integers
//! are required, even pair counts for `MSET`/`HSET`/`ZADD`) happen here,
//! before anything touches the keyspace; a command that fails to parse
//! never partially applies.

use fleetcache_core::{CacheError, Keyspace, Reply};

/// A request, parsed and arity-checked against its command table entry.
pub enum Command {
    /// `GET key`
    Get(Vec<u8>),
    /// `SET key value`
    Set(Vec<u8>, Vec<u8>),
    /// `DEL key`
    Del(Vec<u8>),
    /// `EXISTS key`
    Exists(Vec<u8>),
    /// `MSET key value [key value ...]`
    MSet(Vec<(Vec<u8>, Vec<u8>)>),
    /// `MGET key [key ...]`
    MGet(Vec<Vec<u8>>),
    /// `MDEL key [key ...]`
    MDel(Vec<Vec<u8>>),
    /// `INCR key`
    Incr(Vec<u8>),
    /// `DECR key`
    Decr(Vec<u8>),
    /// `INCRBY key delta`
    IncrBy(Vec<u8>, i64),
    /// `DECRBY key delta`
    DecrBy(Vec<u8>, i64),
    /// `KEYS pattern`
    Keys(Vec<u8>),
    /// `PEXPIRE key ms`
    PExpire(Vec<u8>, i64),
    /// `PTTL key`
    PTtl(Vec<u8>),
    /// `HGET key field`
    HGet(Vec<u8>, Vec<u8>),
    /// `HSET key field value [field value ...]`
    HSet(Vec<u8>, Vec<(Vec<u8>, Vec<u8>)>),
    /// `HDEL key field [field ...]`
    HDel(Vec<u8>, Vec<Vec<u8>>),
    /// `HEXISTS key field`
    HExists(Vec<u8>, Vec<u8>),
    /// `HGETALL key`
    HGetAll(Vec<u8>),
    /// `ZADD key score name [score name ...]`
    ZAdd(Vec<u8>, Vec<(f64, Vec<u8>)>),
    /// `ZREM key name [name ...]`
    ZRem(Vec<u8>, Vec<Vec<u8>>),
    /// `ZSCORE key name`
    ZScore(Vec<u8>, Vec<u8>),
    /// `ZQUERY key score name offset limit`
    ZQuery(Vec<u8>, f64, Vec<u8>, u64, u64),
}

fn parse_i64(b: &[u8]) -> Result<i64, CacheError> {
    std::str::from_utf8(b)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or_else(CacheError::not_an_integer)
}

fn parse_u64(b: &[u8]) -> Result<u64, CacheError> {
    std::str::from_utf8(b)
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .ok_or_else(CacheError::not_an_integer)
}

fn parse_f64(b: &[u8]) -> Result<f64, CacheError> {
    std::str::from_utf8(b)
        .ok()
        .and_then(|s| s.parse::<f64>().ok())
        .ok_or_else(CacheError::not_a_float)
}

fn pairs<T>(
    rest: &[Vec<u8>],
    name: &str,
    first: impl Fn(&[u8]) -> Result<T, CacheError>,
) -> Result<Vec<(T, Vec<u8>)>, CacheError> {
    if rest.is_empty() || rest.len() % 2 != 0 {
        return Err(CacheError::wrong_arity(name));
    }
    rest.chunks_exact(2)
        .map(|pair| Ok((first(&pair[0])?, pair[1].clone())))
        .collect()
}

impl Command {
    /// Parses a raw argument vector (command name plus arguments) into a
    /// [`Command`], or a command-level error if the arity or argument
    /// shapes don't match.
    pub fn parse(argv: &[Vec<u8>]) -> Result<Command, CacheError> {
        let Some((name, rest)) = argv.split_first() else {
            return Err(CacheError::unknown_command(b""));
        };
        let upper = name.to_ascii_uppercase();
        let name_str = String::from_utf8_lossy(&upper).into_owned();

        macro_rules! arity {
            ($n:expr) => {
                if rest.len() != $n {
                    return Err(CacheError::wrong_arity(&name_str));
                }
            };
        }
        macro_rules! min_arity {
            ($n:expr) => {
                if rest.len() < $n {
                    return Err(CacheError::wrong_arity(&name_str));
                }
            };
        }

        Ok(match upper.as_slice() {
            b"GET" => {
                arity!(1);
                Command::Get(rest[0].clone())
            }
            b"SET" => {
                arity!(2);
                Command::Set(rest[0].clone(), rest[1].clone())
            }
            b"DEL" => {
                arity!(1);
                Command::Del(rest[0].clone())
            }
            b"EXISTS" => {
                arity!(1);
                Command::Exists(rest[0].clone())
            }
            b"MSET" => Command::MSet(pairs(rest, &name_str, |k| Ok(k.to_vec()))?),
            b"MGET" => {
                min_arity!(1);
                Command::MGet(rest.to_vec())
            }
            b"MDEL" => {
                min_arity!(1);
                Command::MDel(rest.to_vec())
            }
            b"INCR" => {
                arity!(1);
                Command::Incr(rest[0].clone())
            }
            b"DECR" => {
                arity!(1);
                Command::Decr(rest[0].clone())
            }
            b"INCRBY" => {
                arity!(2);
                Command::IncrBy(rest[0].clone(), parse_i64(&rest[1])?)
            }
            b"DECRBY" => {
                arity!(2);
                Command::DecrBy(rest[0].clone(), parse_i64(&rest[1])?)
            }
            b"KEYS" => {
                arity!(1);
                Command::Keys(rest[0].clone())
            }
            b"PEXPIRE" => {
                arity!(2);
                Command::PExpire(rest[0].clone(), parse_i64(&rest[1])?)
            }
            b"PTTL" => {
                arity!(1);
                Command::PTtl(rest[0].clone())
            }
            b"HGET" => {
                arity!(2);
                Command::HGet(rest[0].clone(), rest[1].clone())
            }
            b"HSET" => {
                min_arity!(3);
                let key = rest[0].clone();
                Command::HSet(key, pairs(&rest[1..], &name_str, |f| Ok(f.to_vec()))?)
            }
            b"HDEL" => {
                min_arity!(2);
                Command::HDel(rest[0].clone(), rest[1..].to_vec())
            }
            b"HEXISTS" => {
                arity!(2);
                Command::HExists(rest[0].clone(), rest[1].clone())
            }
            b"HGETALL" => {
                arity!(1);
                Command::HGetAll(rest[0].clone())
            }
            b"ZADD" => {
                min_arity!(3);
                let key = rest[0].clone();
                Command::ZAdd(key, pairs(&rest[1..], &name_str, |s| parse_f64(s))?)
            }
            b"ZREM" => {
                min_arity!(2);
                Command::ZRem(rest[0].clone(), rest[1..].to_vec())
            }
            b"ZSCORE" => {
                arity!(2);
                Command::ZScore(rest[0].clone(), rest[1].clone())
            }
            b"ZQUERY" => {
                arity!(5);
                Command::ZQuery(
                    rest[0].clone(),
                    parse_f64(&rest[1])?,
                    rest[2].clone(),
                    parse_u64(&rest[3])?,
                    parse_u64(&rest[4])?,
                )
            }
            _ => return Err(CacheError::unknown_command(name)),
        })
    }

    /// Executes this command against `keyspace`, as of `now_ms`.
    pub fn execute(self, keyspace: &mut Keyspace, now_ms: u64) -> Reply {
        match self {
            Command::Get(k) => keyspace.get(&k, now_ms),
            Command::Set(k, v) => keyspace.set(&k, &v),
            Command::Del(k) => keyspace.del(&k, now_ms),
            Command::Exists(k) => keyspace.exists(&k, now_ms),
            Command::MSet(pairs) => {
                let refs: Vec<(&[u8], &[u8])> =
                    pairs.iter().map(|(k, v)| (k.as_slice(), v.as_slice())).collect();
                keyspace.mset(&refs)
            }
            Command::MGet(keys) => {
                let refs: Vec<&[u8]> = keys.iter().map(|k| k.as_slice()).collect();
                keyspace.mget(&refs, now_ms)
            }
            Command::MDel(keys) => {
                let refs: Vec<&[u8]> = keys.iter().map(|k| k.as_slice()).collect();
                keyspace.mdel(&refs, now_ms)
            }
            Command::Incr(k) => keyspace.incr(&k, now_ms),
            Command::Decr(k) => keyspace.decr(&k, now_ms),
            Command::IncrBy(k, n) => keyspace.incrby(&k, n, now_ms),
            Command::DecrBy(k, n) => keyspace.decrby(&k, n, now_ms),
            Command::Keys(pat) => keyspace.keys(&pat, now_ms),
            Command::PExpire(k, ms) => keyspace.pexpire(&k, ms, now_ms),
            Command::PTtl(k) => keyspace.pttl(&k, now_ms),
            Command::HGet(k, f) => keyspace.hget(&k, &f, now_ms),
            Command::HSet(k, pairs) => {
                let refs: Vec<(&[u8], &[u8])> =
                    pairs.iter().map(|(f, v)| (f.as_slice(), v.as_slice())).collect();
                keyspace.hset(&k, &refs, now_ms)
            }
            Command::HDel(k, fields) => {
                let refs: Vec<&[u8]> = fields.iter().map(|f| f.as_slice()).collect();
                keyspace.hdel(&k, &refs, now_ms)
            }
            Command::HExists(k, f) => keyspace.hexists(&k, &f, now_ms),
            Command::HGetAll(k) => keyspace.hgetall(&k, now_ms),
            Command::ZAdd(k, pairs) => {
                let refs: Vec<(f64, &[u8])> =
                    pairs.iter().map(|(s, n)| (*s, n.as_slice())).collect();
                keyspace.zadd(&k, &refs, now_ms)
            }
            Command::ZRem(k, names) => {
                let refs: Vec<&[u8]> = names.iter().map(|n| n.as_slice()).collect();
                keyspace.zrem(&k, &refs, now_ms)
            }
            Command::ZScore(k, n) => keyspace.zscore(&k, &n, now_ms),
            Command::ZQuery(k, score, name, offset, limit) => {
                keyspace.zquery(&k, score, &name, offset, limit, now_ms)
            }
        }
    }
}

/// Parses and executes one request in a single step, folding a parse
/// failure into the same [`Reply::Err`] shape a runtime command error
/// would take.
pub fn dispatch(argv: &[Vec<u8>], keyspace: &mut Keyspace, now_ms: u64) -> Reply {
    match Command::parse(argv) {
        Ok(cmd) => cmd.execute(keyspace, now_ms),
        Err(e) => Reply::Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_command_name() {
        let err = Command::parse(&[b"NOPE".to_vec()]).unwrap_err();
        assert_eq!(err.code, fleetcache_core::ErrorCode::Unknown);
    }

    #[test]
    fn wrong_arity_is_an_arg_error() {
        let err = Command::parse(&[b"GET".to_vec()]).unwrap_err();
        assert_eq!(err.code, fleetcache_core::ErrorCode::Arg);
    }

    #[test]
    fn command_names_are_case_insensitive() {
        assert!(matches!(
            Command::parse(&[b"get".to_vec(), b"k".to_vec()]),
            Ok(Command::Get(_))
        ));
    }

    #[test]
    fn mset_requires_even_argument_count() {
        assert!(Command::parse(&[b"MSET".to_vec(), b"k".to_vec()]).is_err());
    }

    #[test]
    fn end_to_end_set_then_get() {
        let mut ks = Keyspace::new();
        assert_eq!(
            dispatch(&[b"SET".to_vec(), b"a".to_vec(), b"1".to_vec()], &mut ks, 0),
            Reply::str(b"OK".to_vec())
        );
        assert_eq!(
            dispatch(&[b"GET".to_vec(), b"a".to_vec()], &mut ks, 0),
            Reply::str(b"1".to_vec())
        );
    }

    #[test]
    fn zquery_parses_score_and_offsets() {
        let mut ks = Keyspace::new();
        dispatch(
            &[
                b"ZADD".to_vec(),
                b"z".to_vec(),
                b"1".to_vec(),
                b"a".to_vec(),
            ],
            &mut ks,
            0,
        );
        let reply = dispatch(
            &[
                b"ZQUERY".to_vec(),
                b"z".to_vec(),
                b"0".to_vec(),
                b"".to_vec(),
                b"0".to_vec(),
                b"10".to_vec(),
            ],
            &mut ks,
            0,
        );
        assert_eq!(
            reply,
            Reply::Arr(vec![Reply::str(b"a".to_vec()), Reply::Dbl(1.0)])
        );
    }
}
