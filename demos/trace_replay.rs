//! Replays a text trace of allocator operations, one per line:
//!
//! ```text
//! a <id> <size>       allocate <size> bytes, remember the pointer as <id>
//! r <id> <size>       reallocate <id> to <size> bytes, <id> keeps naming the result
//! f <id>              free <id>
//! v                   validate() the whole heap right now
//! ```
//!
//! Lines starting with `#` and blank lines are ignored. A trace is read
//! from a file named as the program's first argument, or from stdin if no
//! argument is given. This is the same kind of format the course this
//! allocator's design is descended from uses to grade student submissions
//! against recorded allocation traces, cut down to what this crate needs
//! for manual exploration and regression capture.

use std::collections::HashMap;
use std::io::{self, Read};
use std::{env, fs};

use segfit_alloc::Allocator;

fn read_trace(path: Option<String>) -> io::Result<Vec<String>> {
  let text = match path {
    Some(path) => fs::read_to_string(path)?,
    None => {
      let mut buf = String::new();
      io::stdin().read_to_string(&mut buf)?;
      buf
    }
  };
  Ok(text.lines().map(str::to_owned).collect())
}

fn main() -> io::Result<()> {
  env_logger::init();

  let path = env::args().nth(1);
  let lines = read_trace(path)?;

  let mut heap = Allocator::new();
  assert!(heap.init(), "init() should always succeed on a fresh process");

  let mut live: HashMap<String, *mut u8> = HashMap::new();
  let mut ops = 0usize;

  for (lineno, raw) in lines.iter().enumerate() {
    let line = raw.trim();
    if line.is_empty() || line.starts_with('#') {
      continue;
    }
    let fields: Vec<&str> = line.split_whitespace().collect();
    match fields.as_slice() {
      ["a", id, size] => {
        let size: usize = size.parse().expect("size must be a number");
        let p = heap.malloc(size);
        println!("line {}: malloc({size}) -> {p:?} (as {id})", lineno + 1);
        assert!(!p.is_null(), "line {}: malloc({size}) failed", lineno + 1);
        live.insert((*id).to_owned(), p);
      }
      ["r", id, size] => {
        let size: usize = size.parse().expect("size must be a number");
        let old = *live.get(*id).unwrap_or_else(|| panic!("line {}: unknown id {id}", lineno + 1));
        let p = heap.realloc(old, size);
        println!("line {}: realloc({id}, {size}) -> {p:?}", lineno + 1);
        assert!(!p.is_null(), "line {}: realloc(_, {size}) failed", lineno + 1);
        live.insert((*id).to_owned(), p);
      }
      ["f", id] => {
        let p = live.remove(*id).unwrap_or_else(|| panic!("line {}: unknown id {id}", lineno + 1));
        println!("line {}: free({id})", lineno + 1);
        heap.free(p);
      }
      ["v"] => {
        println!("line {}: validate()", lineno + 1);
        assert!(heap.validate(), "line {}: validate() failed", lineno + 1);
      }
      other => panic!("line {}: unrecognized trace op {other:?}", lineno + 1),
    }
    ops += 1;
  }

  assert!(heap.validate(), "final validate() failed after {ops} operations");
  println!("replayed {ops} operations, heap is consistent, {} block(s) still live", live.len());
  Ok(())
}
