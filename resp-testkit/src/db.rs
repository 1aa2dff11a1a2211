//! In-memory keyspace and channel registry shared by every connection.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use resp_common::{parse_i64, Command, Reply};
use tokio::sync::mpsc::UnboundedSender;

const WRONG_TYPE: &str = "WRONGTYPE Operation against a key holding the wrong kind of value";
const NOT_INTEGER: &str = "ERR value is not an integer or out of range";

enum Value {
    Str(Vec<u8>),
    List(VecDeque<Vec<u8>>),
    Set(BTreeSet<Vec<u8>>),
}

struct Subscriber {
    session: u64,
    pushes: UnboundedSender<Reply>,
}

#[derive(Default)]
struct State {
    entries: HashMap<Vec<u8>, Value>,
    channels: HashMap<String, Vec<Subscriber>>,
}

/// Handle to the shared server state.
#[derive(Clone, Default)]
pub(crate) struct Db {
    shared: Arc<Mutex<State>>,
}

impl Db {
    pub(crate) fn new() -> Self {
        Db::default()
    }

    /// Runs one data command.
    pub(crate) fn execute(&self, cmd: &Command) -> Reply {
        match self.lock() {
            Ok(mut state) => state.apply(cmd),
            Err(reply) => reply,
        }
    }

    /// Runs a whole EXEC batch under one lock so no other client interleaves.
    pub(crate) fn execute_batch(&self, cmds: &[Command]) -> Reply {
        match self.lock() {
            Ok(mut state) => Reply::array(cmds.iter().map(|cmd| state.apply(cmd)).collect()),
            Err(reply) => reply,
        }
    }

    pub(crate) fn subscribe(&self, channel: &str, session: u64, pushes: UnboundedSender<Reply>) {
        if let Ok(mut state) = self.lock() {
            state
                .channels
                .entry(channel.to_string())
                .or_default()
                .push(Subscriber { session, pushes });
        }
    }

    pub(crate) fn unsubscribe(&self, channel: &str, session: u64) {
        if let Ok(mut state) = self.lock() {
            if let Some(subscribers) = state.channels.get_mut(channel) {
                subscribers.retain(|sub| sub.session != session);
                if subscribers.is_empty() {
                    state.channels.remove(channel);
                }
            }
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>, Reply> {
        self.shared
            .lock()
            .map_err(|_| Reply::error("ERR server state is poisoned"))
    }
}

/// Argument count check shared by direct execution and MULTI queuing.
pub(crate) fn check_arity(cmd: &Command) -> Result<(), Reply> {
    let name = String::from_utf8_lossy(cmd.name()).to_ascii_lowercase();
    let (min, max) = match name.as_str() {
        "ping" => (1, Some(2)),
        "get" | "incr" | "llen" | "smembers" => (2, Some(2)),
        "set" | "incrby" | "publish" => (3, Some(3)),
        "del" | "exists" => (2, None),
        "lpush" | "rpush" | "sadd" | "srem" => (3, None),
        "lrange" | "ltrim" => (4, Some(4)),
        _ => return Err(Reply::error(&format!("ERR unknown command '{name}'"))),
    };
    let argc = cmd.len();
    if argc < min || max.is_some_and(|max| argc > max) {
        return Err(Reply::error(&format!(
            "ERR wrong number of arguments for '{name}' command"
        )));
    }
    Ok(())
}

impl State {
    fn apply(&mut self, cmd: &Command) -> Reply {
        if let Err(reply) = check_arity(cmd) {
            return reply;
        }
        let args = cmd.as_slice();
        let result = match String::from_utf8_lossy(cmd.name()).to_ascii_uppercase().as_str() {
            "PING" => Ok(match args.get(1) {
                Some(message) => Reply::bulk(message.clone()),
                None => Reply::status("PONG"),
            }),
            "GET" => self.get(&args[1]),
            "SET" => {
                self.entries.insert(args[1].clone(), Value::Str(args[2].clone()));
                Ok(Reply::ok())
            }
            "DEL" => Ok(Reply::Integer(
                args[1..].iter().filter(|key| self.entries.remove(*key).is_some()).count() as i64,
            )),
            "EXISTS" => Ok(Reply::Integer(
                args[1..].iter().filter(|key| self.entries.contains_key(*key)).count() as i64,
            )),
            "INCR" => self.incr_by(&args[1], 1),
            "INCRBY" => match parse_i64(&args[2]) {
                Ok(delta) => self.incr_by(&args[1], delta),
                Err(_) => Err(NOT_INTEGER),
            },
            "LPUSH" => self.push(&args[1], &args[2..], true),
            "RPUSH" => self.push(&args[1], &args[2..], false),
            "LRANGE" => self.lrange(args),
            "LTRIM" => self.ltrim(args),
            "LLEN" => self.list(&args[1]).map(|list| Reply::Integer(list.map_or(0, |list| list.len() as i64))),
            "SADD" => self.sadd(&args[1], &args[2..]),
            "SREM" => self.srem(&args[1], &args[2..]),
            "SMEMBERS" => self.smembers(&args[1]),
            "PUBLISH" => Ok(self.publish(&args[1], &args[2])),
            _ => Err("ERR unknown command"),
        };
        result.unwrap_or_else(Reply::error)
    }

    fn get(&self, key: &[u8]) -> Result<Reply, &'static str> {
        match self.entries.get(key) {
            Some(Value::Str(data)) => Ok(Reply::bulk(data.clone())),
            Some(_) => Err(WRONG_TYPE),
            None => Ok(Reply::null()),
        }
    }

    fn incr_by(&mut self, key: &[u8], delta: i64) -> Result<Reply, &'static str> {
        let current = match self.entries.get(key) {
            Some(Value::Str(data)) => parse_i64(data).map_err(|_| NOT_INTEGER)?,
            Some(_) => return Err(WRONG_TYPE),
            None => 0,
        };
        let next = current
            .checked_add(delta)
            .ok_or("ERR increment or decrement would overflow")?;
        self.entries
            .insert(key.to_vec(), Value::Str(next.to_string().into_bytes()));
        Ok(Reply::Integer(next))
    }

    fn list(&self, key: &[u8]) -> Result<Option<&VecDeque<Vec<u8>>>, &'static str> {
        match self.entries.get(key) {
            Some(Value::List(list)) => Ok(Some(list)),
            Some(_) => Err(WRONG_TYPE),
            None => Ok(None),
        }
    }

    fn push(&mut self, key: &[u8], values: &[Vec<u8>], front: bool) -> Result<Reply, &'static str> {
        let entry = self
            .entries
            .entry(key.to_vec())
            .or_insert_with(|| Value::List(VecDeque::new()));
        let Value::List(list) = entry else {
            return Err(WRONG_TYPE);
        };
        for value in values {
            if front {
                list.push_front(value.clone());
            } else {
                list.push_back(value.clone());
            }
        }
        Ok(Reply::Integer(list.len() as i64))
    }

    fn lrange(&self, args: &[Vec<u8>]) -> Result<Reply, &'static str> {
        let (start, stop) = range_args(args)?;
        let Some(list) = self.list(&args[1])? else {
            return Ok(Reply::array(Vec::new()));
        };
        let items = match normalize_range(start, stop, list.len()) {
            Some((from, to)) => list.range(from..=to).cloned().map(Reply::bulk).collect(),
            None => Vec::new(),
        };
        Ok(Reply::array(items))
    }

    fn ltrim(&mut self, args: &[Vec<u8>]) -> Result<Reply, &'static str> {
        let (start, stop) = range_args(args)?;
        let len = match self.list(&args[1])? {
            Some(list) => list.len(),
            None => return Ok(Reply::ok()),
        };
        match normalize_range(start, stop, len) {
            Some((from, to)) => {
                if let Some(Value::List(list)) = self.entries.get_mut(args[1].as_slice()) {
                    list.truncate(to + 1);
                    list.drain(..from);
                }
            }
            None => {
                self.entries.remove(args[1].as_slice());
            }
        }
        Ok(Reply::ok())
    }

    fn sadd(&mut self, key: &[u8], members: &[Vec<u8>]) -> Result<Reply, &'static str> {
        let entry = self
            .entries
            .entry(key.to_vec())
            .or_insert_with(|| Value::Set(BTreeSet::new()));
        let Value::Set(set) = entry else {
            return Err(WRONG_TYPE);
        };
        let added = members.iter().filter(|member| set.insert((*member).clone())).count();
        Ok(Reply::Integer(added as i64))
    }

    fn srem(&mut self, key: &[u8], members: &[Vec<u8>]) -> Result<Reply, &'static str> {
        let (removed, now_empty) = match self.entries.get_mut(key) {
            Some(Value::Set(set)) => {
                let removed = members.iter().filter(|member| set.remove(member.as_slice())).count();
                (removed, set.is_empty())
            }
            Some(_) => return Err(WRONG_TYPE),
            None => (0, false),
        };
        if now_empty {
            self.entries.remove(key);
        }
        Ok(Reply::Integer(removed as i64))
    }

    fn smembers(&self, key: &[u8]) -> Result<Reply, &'static str> {
        match self.entries.get(key) {
            Some(Value::Set(set)) => Ok(Reply::array(set.iter().cloned().map(Reply::bulk).collect())),
            Some(_) => Err(WRONG_TYPE),
            None => Ok(Reply::array(Vec::new())),
        }
    }

    fn publish(&mut self, channel: &[u8], payload: &[u8]) -> Reply {
        let channel = String::from_utf8_lossy(channel).into_owned();
        let Some(subscribers) = self.channels.get_mut(&channel) else {
            return Reply::Integer(0);
        };
        let message = Reply::array(vec![
            Reply::bulk("message"),
            Reply::bulk(channel.clone()),
            Reply::bulk(payload.to_vec()),
        ]);
        subscribers.retain(|sub| sub.pushes.send(message.clone()).is_ok());
        let delivered = subscribers.len() as i64;
        if subscribers.is_empty() {
            self.channels.remove(&channel);
        }
        Reply::Integer(delivered)
    }
}

fn range_args(args: &[Vec<u8>]) -> Result<(i64, i64), &'static str> {
    let start = parse_i64(&args[2]).map_err(|_| NOT_INTEGER)?;
    let stop = parse_i64(&args[3]).map_err(|_| NOT_INTEGER)?;
    Ok((start, stop))
}

/// Resolves an inclusive, possibly negative range against `len`. `None` means
/// the range selects nothing.
fn normalize_range(start: i64, stop: i64, len: usize) -> Option<(usize, usize)> {
    let len = len as i64;
    let start = if start < 0 { (start + len).max(0) } else { start };
    let stop = if stop < 0 { stop + len } else { stop.min(len - 1) };
    if len == 0 || start > stop || start >= len {
        return None;
    }
    Some((start as usize, stop as usize))
}
