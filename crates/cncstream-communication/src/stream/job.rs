//! Job lifecycle

use super::{
    heightmap::HeightMapProbe, probe_program, HeightMapGrid, LineStatus, PollCadence,
    ProbeArea, ProgramSource, StreamController, StreamEvent, Toolpath,
};
use crate::communication::Link;
use cncstream_core::{ConnectionError, ControllerError, Result};
use std::time::Instant;

impl<L: Link> StreamController<L> {
    /// Load the program the next job streams
    pub fn load_program(&mut self, program: Box<dyn ProgramSource>) {
        tracing::debug!("Loaded program with {} lines", program.line_count());
        self.program = Some(program);
        self.job.command_index = 0;
        self.job.processed_index = 0;
        self.last_drawn = 0;
    }

    /// Attach or detach the rendered toolpath
    pub fn set_toolpath(&mut self, toolpath: Option<Box<dyn Toolpath>>) {
        self.toolpath = toolpath;
        self.last_drawn = 0;
    }

    /// Attach or detach the height map filled by probe acknowledgements
    pub fn set_height_map(&mut self, grid: Option<HeightMapGrid>) {
        self.height_map = grid.map(HeightMapProbe::new);
    }

    /// Probing program for the attached height map
    ///
    /// Probes move at the configured probing feed. `None` without a height map.
    pub fn height_map_program(
        &self,
        area: &ProbeArea,
        z_top: f64,
        z_bottom: f64,
    ) -> Option<Vec<String>> {
        let probe = self.height_map.as_ref()?;
        let cycle = self.config.probe_cycle(z_top, z_bottom);
        Some(probe_program(probe.grid(), area, &cycle))
    }

    /// Stream the loaded program from its first line
    pub fn start_job(&mut self) -> Result<()> {
        self.start_job_at(0)
    }

    /// Stream the loaded program from `index`
    pub fn start_job_at(&mut self, index: usize) -> Result<()> {
        let line_count = self.line_count();
        if line_count == 0 || index >= line_count {
            return Err(ControllerError::NoJob.into());
        }
        if !self.link.is_open() {
            return Err(ConnectionError::NotOpen.into());
        }

        self.job.command_index = index;
        self.job.processed_index = index;
        self.last_drawn = 0;
        if let Some(probe) = self.height_map.as_mut() {
            probe.restart();
        }
        if let Some(program) = self.program.as_deref_mut() {
            for i in 0..line_count {
                program.set_line_status(i, LineStatus::Pending);
            }
        }

        self.job.transfer_completed = false;
        self.job.processing = true;
        self.job.file_end_sent = false;
        self.started_at = Some(Instant::now());

        tracing::info!("Starting job at line {} of {}", index + 1, line_count);
        self.events.publish(StreamEvent::JobStarted { lines: line_count });
        self.send_next_file_commands();
        Ok(())
    }

    /// The machine finished the last streamed command
    pub(crate) fn complete_job(&mut self) {
        if let Some(toolpath) = self.toolpath.as_deref_mut() {
            if self.last_drawn < toolpath.len() {
                toolpath.set_drawn(self.last_drawn);
                self.events
                    .publish(StreamEvent::SegmentsDrawn(vec![self.last_drawn]));
            }
        }

        self.job.processing = false;
        self.job.processed_index = 0;
        self.last_drawn = 0;
        self.stored_parser_state.clear();

        let elapsed_ms = self
            .started_at
            .take()
            .map_or(0, |t| t.elapsed().as_millis() as u64);
        tracing::info!("Job done in {} ms", elapsed_ms);
        self.events.publish(StreamEvent::JobCompleted { elapsed_ms });
        self.set_cadence(PollCadence::Normal);
    }
}
