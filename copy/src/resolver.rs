use codebraid_chunk::{CodeChunk, OptionValue};
use codebraid_message::{Message, MessageKind};
use std::collections::HashMap;

fn placeholder() -> CodeChunk {
    CodeChunk::new(None, Vec::new(), HashMap::new(), None, None, false)
}

/// Swap `chunks[i]` out for a placeholder, call `f` with the removed chunk
/// and shared access to the rest of the slice (for reading its copy
/// targets), then put the (possibly mutated) chunk back.
///
/// `CodeChunk::copy_code`/`copy_output` need `&mut self` plus `&[&CodeChunk]`
/// borrows of *other* elements of the same `Vec`; the borrow checker can't
/// see that `i` and the target indices never alias, so the chunk being
/// resolved is temporarily moved out instead.
fn with_chunk_and_targets<R>(chunks: &mut [CodeChunk], i: usize, targets: &[usize], f: impl FnOnce(&mut CodeChunk, &[&CodeChunk]) -> R) -> R {
    let mut taken = std::mem::replace(&mut chunks[i], placeholder());
    let target_refs: Vec<&CodeChunk> = targets.iter().map(|&t| &chunks[t]).collect();
    let result = f(&mut taken, &target_refs);
    chunks[i] = taken;
    result
}

/// Index every chunk that declares a `name`, then resolve each chunk's
/// `copy` target names to indices, recording a `SourceError` for any
/// unknown name -- grounded on `_resolve_code_copying`'s setup phase
/// (`codeprocessors/base.py`).
fn index_copy_targets(chunks: &mut [CodeChunk]) -> Vec<usize> {
    let mut by_name: HashMap<String, usize> = HashMap::new();
    for (i, c) in chunks.iter().enumerate() {
        if let Some(OptionValue::Str(name)) = c.options.get("name") {
            by_name.insert(name.clone(), i);
        }
    }
    let mut pending = Vec::new();
    for i in 0..chunks.len() {
        let target_names = match chunks[i].options.get("copy").and_then(OptionValue::as_str_list) {
            Some(names) => names.to_vec(),
            None => continue,
        };
        let mut indices = Vec::new();
        let mut unknown = Vec::new();
        for name in &target_names {
            match by_name.get(name) {
                Some(&idx) => indices.push(idx),
                None => unknown.push(name.clone()),
            }
        }
        if !unknown.is_empty() {
            chunks[i].errors.push(Message::new(
                MessageKind::SourceError,
                format!("Unknown name(s) in \"copy\": {}", unknown.join(", ")),
            ));
        } else {
            chunks[i].copy_chunk_indices = indices;
            pending.push(i);
        }
    }
    pending
}

/// DFS cycle search among the chunks still pending resolution: any node
/// re-entering its own path is part of a cycle. Every chunk on the cycle
/// gets a traceback-style error naming the chain, and is dropped from
/// `pending` so the outer fixed-point loop can terminate.
fn break_cycles(chunks: &mut [CodeChunk], pending: &mut Vec<usize>) {
    let pending_set: std::collections::HashSet<usize> = pending.iter().copied().collect();
    let mut cycle_members: std::collections::HashSet<usize> = std::collections::HashSet::new();

    for &start in pending.iter() {
        if cycle_members.contains(&start) {
            continue;
        }
        let mut path = Vec::new();
        let mut on_path: HashMap<usize, usize> = HashMap::new();
        let mut node = start;
        loop {
            if let Some(&pos) = on_path.get(&node) {
                for &member in &path[pos..] {
                    cycle_members.insert(member);
                }
                break;
            }
            if !pending_set.contains(&node) || path.contains(&node) {
                break;
            }
            on_path.insert(node, path.len());
            path.push(node);
            let next = chunks[node].copy_chunk_indices.first().copied();
            match next {
                Some(n) if pending_set.contains(&n) => node = n,
                _ => break,
            }
        }
    }

    for &member in &cycle_members {
        let chain: Vec<String> = {
            let mut names = Vec::new();
            let mut cur = member;
            loop {
                let label = chunks[cur].options.get("name").and_then(OptionValue::as_str).map(str::to_string).unwrap_or_else(|| format!("#{cur}"));
                names.push(label);
                let next = chunks[cur].copy_chunk_indices.first().copied();
                match next {
                    Some(n) if n == member => break,
                    Some(n) if cycle_members.contains(&n) => cur = n,
                    _ => break,
                }
            }
            names
        };
        let mut chain_display = chain.clone();
        if let Some(first) = chain.first() {
            chain_display.push(first.clone());
        }
        chunks[member].errors.push(Message::new(
            MessageKind::SourceError,
            format!("Cyclic \"copy\" dependency: {}", chain_display.join(" -> ")),
        ));
    }
    pending.retain(|i| !cycle_members.contains(i));
}

/// Resolve every chunk's `copy`/`paste` code dependencies, including cycles
/// -- grounded on `_resolve_code_copying` (`codeprocessors/base.py`). Must
/// run after every chunk's `Options` has been built and before chunks are
/// grouped into sessions/sources, since `copy` targets are named globally
/// across the whole document.
pub fn resolve_code_copying(chunks: &mut [CodeChunk]) {
    let mut pending = index_copy_targets(chunks);

    while !pending.is_empty() {
        let mut progressed = false;
        let mut still_pending = Vec::new();
        for i in pending.drain(..) {
            let targets = chunks[i].copy_chunk_indices.clone();
            let blocked = targets.iter().any(|&t| chunks[t].errors.prevent_exec);
            if blocked {
                chunks[i].errors.push(Message::new(
                    MessageKind::SourceError,
                    "Cannot copy a code chunk that failed to resolve".to_string(),
                ));
                progressed = true;
                continue;
            }
            let all_targets_ready = targets.iter().all(|&t| !chunks[t].needs_to_copy || chunks[t].command.as_deref() == Some("paste"));
            let all_code_resolved = targets.iter().all(|&t| !chunks[t].code_lines.is_empty() || !chunks[t].errors.is_empty());
            if all_targets_ready && all_code_resolved {
                let self_name = chunks[i].options.get("name").and_then(OptionValue::as_str).map(str::to_string);
                with_chunk_and_targets(chunks, i, &targets, |chunk, target_refs| {
                    chunk.copy_code(target_refs, self_name.as_deref());
                });
                progressed = true;
            } else {
                still_pending.push(i);
            }
        }
        pending = still_pending;
        if !progressed && !pending.is_empty() {
            break_cycles(chunks, &mut pending);
            if pending.is_empty() {
                break;
            }
        }
    }
}

/// Second pass, run after every session has executed: carry stdout/stderr/
/// expr/rich/repl lines for `paste` chunks -- grounded on
/// `_resolve_output_copying` (`codeprocessors/base.py`). Runs a fixed-point
/// loop of its own because a `paste` may copy another `paste`'s output.
pub fn resolve_output_copying(chunks: &mut [CodeChunk]) {
    let mut pending: Vec<usize> = (0..chunks.len()).filter(|&i| chunks[i].needs_to_copy).collect();

    while !pending.is_empty() {
        let mut progressed = false;
        let mut still_pending = Vec::new();
        for i in pending.drain(..) {
            let targets = chunks[i].copy_chunk_indices.clone();
            if targets.iter().all(|&t| !chunks[t].needs_to_copy) {
                with_chunk_and_targets(chunks, i, &targets, |chunk, target_refs| {
                    let _ = chunk.copy_output(target_refs);
                });
                progressed = true;
            } else {
                still_pending.push(i);
            }
        }
        pending = still_pending;
        if !progressed && !pending.is_empty() {
            for &i in &pending {
                chunks[i].errors.push(Message::new(
                    MessageKind::SourceError,
                    "Could not resolve output copy (dependency never finished executing)".to_string(),
                ));
            }
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn named_chunk(command: &str, name: &str, copy: Option<&str>) -> CodeChunk {
        let mut custom = HashMap::new();
        custom.insert("name".to_string(), codebraid_chunk::RawValue::Str(name.to_string()));
        if let Some(c) = copy {
            custom.insert("copy".to_string(), codebraid_chunk::RawValue::Str(c.to_string()));
        }
        let code = if copy.is_some() { vec![" ".to_string()] } else { vec!["x = 1".to_string()] };
        CodeChunk::new(Some(command), code, custom, None, None, false)
    }

    #[test]
    fn simple_copy_inherits_code_lines() {
        let mut chunks = vec![named_chunk("code", "a", None), named_chunk("code", "b", Some("a"))];
        resolve_code_copying(&mut chunks);
        assert!(chunks[1].errors.is_empty(), "{:?}", chunks[1].errors.iter().collect::<Vec<_>>().iter().map(|m| m.message.clone()).collect::<Vec<_>>());
        assert_eq!(chunks[1].code_lines, chunks[0].code_lines);
    }

    #[test]
    fn unknown_copy_target_is_an_error() {
        let mut chunks = vec![named_chunk("code", "b", Some("missing"))];
        resolve_code_copying(&mut chunks);
        assert!(!chunks[0].errors.is_empty());
    }

    #[test]
    fn three_way_cycle_is_detected_and_marks_every_member() {
        let mut chunks = vec![
            named_chunk("code", "a", Some("b")),
            named_chunk("code", "b", Some("c")),
            named_chunk("code", "c", Some("a")),
        ];
        resolve_code_copying(&mut chunks);
        assert!(!chunks[0].errors.is_empty());
        assert!(!chunks[1].errors.is_empty());
        assert!(!chunks[2].errors.is_empty());
    }
}
