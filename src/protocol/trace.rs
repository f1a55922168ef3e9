//! Wire tracing decorator.
//!
//! [`Traced`] wraps any [`WireRead`]/[`WireWrite`] and logs every operation
//! under the `strata::wire` target with the peer address, the operation, its
//! size on the wire and, for reads, the decoded value. It only observes:
//! bytes and results pass through untouched.
use std::{collections::HashSet, fmt::Debug};

use log::debug;

use super::{
    Rid,
    codec::{Cleared, Result, WireRead, WireWrite},
    rid::RID_SIZE,
};

pub const TARGET: &str = "strata::wire";

const PREFIX_SIZE: usize = size_of::<i32>();

pub struct Traced<C> {
    inner: C,
    peer: String,
}

impl<C> Traced<C> {
    pub fn new(inner: C, peer: impl Into<String>) -> Self {
        Self {
            inner,
            peer: peer.into(),
        }
    }

    pub fn into_inner(self) -> C {
        self.inner
    }

    fn read<T: Debug>(&self, op: &str, size: impl Fn(&T) -> usize, res: Result<T>) -> Result<T> {
        match &res {
            Ok(value) => debug!(
                target: TARGET,
                "{} - read {op} ({} bytes): {value:?}",
                self.peer,
                size(value)
            ),
            Err(e) => debug!(target: TARGET, "{} - read {op} failed: {e}", self.peer),
        }
        res
    }

    fn wrote<T: Debug + ?Sized>(&self, op: &str, size: usize, value: &T) {
        debug!(
            target: TARGET,
            "{} - writing {op} ({size} bytes): {value:?}", self.peer
        );
    }
}

fn frame_size<T: AsRef<[u8]>>(value: &Option<T>) -> usize {
    PREFIX_SIZE + value.as_ref().map_or(0, |v| v.as_ref().len())
}

fn strings_size<'a>(items: impl Iterator<Item = &'a String>) -> usize {
    PREFIX_SIZE + items.map(|s| PREFIX_SIZE + s.len()).sum::<usize>()
}

impl<C: WireRead> WireRead for Traced<C> {
    fn read_u8(&mut self) -> Result<u8> {
        let res = self.inner.read_u8();
        self.read("byte", |_| 1, res)
    }

    fn read_i16(&mut self) -> Result<i16> {
        let res = self.inner.read_i16();
        self.read("short", |_| 2, res)
    }

    fn read_i32(&mut self) -> Result<i32> {
        let res = self.inner.read_i32();
        self.read("int", |_| 4, res)
    }

    fn read_i64(&mut self) -> Result<i64> {
        let res = self.inner.read_i64();
        self.read("long", |_| 8, res)
    }

    fn read_string(&mut self) -> Result<Option<String>> {
        let res = self.inner.read_string();
        self.read("string", frame_size::<String>, res)
    }

    fn read_bytes(&mut self) -> Result<Option<Vec<u8>>> {
        let res = self.inner.read_bytes();
        self.read("bytes", frame_size::<Vec<u8>>, res)
    }

    fn read_string_list(&mut self) -> Result<Option<Vec<String>>> {
        let res = self.inner.read_string_list();
        self.read(
            "string list",
            |v: &Option<Vec<String>>| v.as_ref().map_or(PREFIX_SIZE, |v| strings_size(v.iter())),
            res,
        )
    }

    fn read_string_set(&mut self) -> Result<Option<HashSet<String>>> {
        let res = self.inner.read_string_set();
        self.read(
            "string set",
            |v: &Option<HashSet<String>>| {
                v.as_ref().map_or(PREFIX_SIZE, |v| strings_size(v.iter()))
            },
            res,
        )
    }

    fn read_rid(&mut self) -> Result<Rid> {
        let res = self.inner.read_rid();
        self.read("rid", |_| RID_SIZE, res)
    }

    fn drain_pending(&mut self, scratch: &mut [u8]) -> Result<Cleared> {
        let res = self.inner.drain_pending(scratch);
        self.read("pending input", |c: &Cleared| c.bytes, res)
    }
}

impl<C: WireWrite> WireWrite for Traced<C> {
    fn write_u8(&mut self, value: u8) -> Result<()> {
        self.wrote("byte", 1, &value);
        self.inner.write_u8(value)
    }

    fn write_i16(&mut self, value: i16) -> Result<()> {
        self.wrote("short", 2, &value);
        self.inner.write_i16(value)
    }

    fn write_i32(&mut self, value: i32) -> Result<()> {
        self.wrote("int", 4, &value);
        self.inner.write_i32(value)
    }

    fn write_i64(&mut self, value: i64) -> Result<()> {
        self.wrote("long", 8, &value);
        self.inner.write_i64(value)
    }

    fn write_string(&mut self, value: Option<&str>) -> Result<()> {
        self.wrote("string", frame_size(&value), &value);
        self.inner.write_string(value)
    }

    fn write_bytes(&mut self, value: Option<&[u8]>) -> Result<()> {
        self.wrote("bytes", frame_size(&value), &value);
        self.inner.write_bytes(value)
    }

    fn write_string_collection(&mut self, items: Option<&[&str]>) -> Result<()> {
        let size = PREFIX_SIZE
            + items.map_or(0, |items| {
                items.iter().map(|s| PREFIX_SIZE + s.len()).sum::<usize>()
            });
        self.wrote("string collection", size, &items);
        self.inner.write_string_collection(items)
    }

    fn write_rid(&mut self, rid: &Rid) -> Result<()> {
        self.wrote("rid", RID_SIZE, rid);
        self.inner.write_rid(rid)
    }

    fn flush(&mut self) -> Result<()> {
        debug!(target: TARGET, "{} - flush", self.peer);
        self.inner.flush()
    }
}
