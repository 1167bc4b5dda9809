//! Toolpath shadowing
//!
//! Marks the segments the tool has already passed so a viewer can draw
//! them differently.

use super::{StreamController, StreamEvent};
use crate::communication::Link;
use cncstream_core::Position;

impl<L: Link> StreamController<L> {
    /// Advance the drawn marker to the segment the tool is on
    ///
    /// Only segments of lines up to one past the last acknowledged line
    /// are searched.
    pub(crate) fn shadow_toolpath(&mut self, tool: Position) {
        let Some(toolpath) = self.toolpath.as_deref_mut() else {
            return;
        };
        let limit = self
            .program
            .as_deref()
            .map_or(0, |p| p.line_geometry_end_index(self.job.processed_index))
            + 1;

        let mut found = None;
        let mut i = self.last_drawn;
        while i < toolpath.len() && toolpath.line_number(i) <= limit {
            if toolpath.contains(i, &tool) {
                found = Some(i);
                break;
            }
            i += 1;
        }

        match found {
            Some(segment) => {
                let drawn: Vec<usize> = (self.last_drawn..segment).collect();
                for &s in &drawn {
                    toolpath.set_drawn(s);
                }
                self.last_drawn = segment;
                if !drawn.is_empty() {
                    self.events.publish(StreamEvent::SegmentsDrawn(drawn));
                }
            }
            None => tracing::debug!("Tool missed: {} at segment {}", tool, self.last_drawn),
        }
    }

    /// Move the shadow by acknowledgements while check mode runs
    ///
    /// No motion happens in check mode, so the tool is placed at the end of
    /// the last segment belonging to an acknowledged line.
    pub(crate) fn shadow_check_mode(&mut self) {
        let Some(toolpath) = self.toolpath.as_deref_mut() else {
            return;
        };
        let line_count = self.program.as_deref().map_or(0, |p| p.line_count());

        if !self.job.transfer_completed && self.job.processed_index + 1 < line_count {
            let limit = self
                .program
                .as_deref()
                .map_or(0, |p| p.line_geometry_end_index(self.job.processed_index));

            let mut drawn = Vec::new();
            let mut i = self.last_drawn;
            while i < toolpath.len() && toolpath.line_number(i) <= limit {
                drawn.push(i);
                i += 1;
            }
            if drawn.is_empty() {
                return;
            }
            for &s in &drawn {
                toolpath.set_drawn(s);
            }

            let tool = (i < toolpath.len()).then(|| {
                self.last_drawn = i;
                toolpath.end(i)
            });
            self.events.publish(StreamEvent::SegmentsDrawn(drawn));
            if let Some(tool) = tool {
                self.set_tool_position(tool);
            }
        } else {
            let end = (0..toolpath.len())
                .map(|s| toolpath.end(s))
                .find(Position::is_finite);
            if let Some(end) = end {
                self.set_tool_position(end);
            }
        }
    }
}
