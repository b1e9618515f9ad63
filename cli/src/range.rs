//! Block range expressions.
//!
//! A range is `START:END`, `START` (that block only), `START:` (follow the
//! chain from `START`), or empty (follow the chain from the head). Each
//! bound is a decimal number, `0x`-prefixed or `h`-suffixed hex, or `+N` /
//! `-N` relative to the head block.

use anyhow::{anyhow, bail, Context, Result};

use steemwatch_stream::{BlockRange, FIRST_BLOCK};

pub fn parse_number(s: &str) -> Result<u64> {
    let parsed = if let Some(hex) = s.strip_prefix("0x") {
        u64::from_str_radix(hex, 16)
    } else if let Some(hex) = s.strip_suffix(['h', 'H']) {
        u64::from_str_radix(hex, 16)
    } else {
        s.parse()
    };
    parsed.with_context(|| format!("invalid block number `{s}`"))
}

/// Resolve one bound; `None` for an empty (open) bound.
pub fn parse_block_num(head: u64, s: &str) -> Result<Option<u64>> {
    if s.is_empty() {
        return Ok(None);
    }
    let num = if let Some(delta) = s.strip_prefix('+') {
        head.checked_add(parse_number(delta)?)
            .ok_or_else(|| anyhow!("block `{s}` overflows"))?
    } else if let Some(delta) = s.strip_prefix('-') {
        head.checked_sub(parse_number(delta)?)
            .ok_or_else(|| anyhow!("block `{s}` is before genesis (head is {head})"))?
    } else {
        parse_number(s)?
    };
    Ok(Some(num))
}

pub fn parse_range(head: u64, s: &str) -> Result<BlockRange> {
    if s.is_empty() {
        return Ok(BlockRange::unbounded(head));
    }
    let Some((lhs, rhs)) = s.split_once(':') else {
        let block = parse_block_num(head, s)?.ok_or_else(|| anyhow!("empty block number"))?;
        check_start(block)?;
        let end = block
            .checked_add(1)
            .ok_or_else(|| anyhow!("block `{s}` overflows"))?;
        return Ok(BlockRange::bounded(block, end));
    };
    let start = parse_block_num(head, lhs)?
        .ok_or_else(|| anyhow!("range `{s}` has no start block"))?;
    check_start(start)?;
    match parse_block_num(head, rhs)? {
        Some(end) if end < start => bail!("range `{s}` ends before it starts"),
        Some(end) => Ok(BlockRange::bounded(start, end)),
        None => Ok(BlockRange::unbounded(start)),
    }
}

fn check_start(block: u64) -> Result<()> {
    if block < FIRST_BLOCK {
        bail!("block numbers start at {FIRST_BLOCK}");
    }
    Ok(())
}
