use std::{collections::HashMap, io::Write};

use chatov_core::{
    errors::Error,
    ports::{MessageView, NodeId, Renderer},
    Result,
};

/// Colour only when writing to a terminal and `NO_COLOR` is unset or empty.
pub fn color_enabled(is_terminal: bool, no_color: Option<&str>) -> bool {
    is_terminal && no_color.map_or(true, str::is_empty)
}

/// Renders chat lines to a terminal (or any writer) as they arrive.
///
/// Nodes cannot be erased from a scrolling terminal, so removal is only tracked; the live set
/// is what an on-screen overlay would be showing.
pub struct TerminalRenderer<W> {
    out: W,
    next: u64,
    live: HashMap<NodeId, Vec<String>>,
    ansi: bool,
}

impl<W: Write> TerminalRenderer<W> {
    pub fn new(out: W, ansi: bool) -> Self {
        Self {
            out,
            next: 0,
            live: HashMap::new(),
            ansi,
        }
    }

    pub fn live_nodes(&self) -> usize {
        self.live.len()
    }

    fn paint_author(&self, author: &str, color: &str) -> String {
        match (self.ansi, parse_hex_color(color)) {
            (true, Some((r, g, b))) => format!("\x1b[1;38;2;{r};{g};{b}m{author}\x1b[0m"),
            _ => author.to_string(),
        }
    }
}

/// `#RRGGBB` → `(r, g, b)`.
pub fn parse_hex_color(color: &str) -> Option<(u8, u8, u8)> {
    let hex = color.strip_prefix('#')?;
    if hex.len() != 6 || !hex.is_ascii() {
        return None;
    }
    let channel = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).ok();
    Some((channel(0)?, channel(2)?, channel(4)?))
}

impl<W: Write> Renderer for TerminalRenderer<W> {
    fn create(&mut self, view: &MessageView<'_>) -> Result<NodeId> {
        let id = NodeId(self.next);
        self.next += 1;

        let mut line = String::new();
        if let Some(reply) = view.reply {
            line.push_str(&format!("  ↪ @{}: {}\n", reply.user, reply.text));
        }
        if !view.badges.is_empty() {
            line.push_str(&format!("[{} badge(s)] ", view.badges.len()));
        }
        line.push_str(&self.paint_author(view.author, view.author_color));
        line.push_str(": ");
        line.push_str(view.text);

        writeln!(self.out, "{line}").map_err(Error::Io)?;
        self.out.flush().map_err(Error::Io)?;

        self.live
            .insert(id, view.badges.iter().map(|b| b.to_string()).collect());
        Ok(id)
    }

    fn set_badge_source(&mut self, node: NodeId, slot: usize, locator: &str) -> Result<()> {
        let badges = self
            .live
            .get_mut(&node)
            .ok_or_else(|| Error::Render(format!("unknown node {}", node.0)))?;
        let badge = badges
            .get_mut(slot)
            .ok_or_else(|| Error::Render(format!("node {} has no badge {slot}", node.0)))?;
        *badge = locator.to_string();
        tracing::trace!(node = node.0, slot, locator, "badge source updated");
        Ok(())
    }

    fn mark_removing(&mut self, node: NodeId) {
        tracing::trace!(node = node.0, "message leaving");
    }

    fn destroy(&mut self, node: NodeId) {
        self.live.remove(&node);
    }
}
