use std::cell::Cell;
use std::time::{Duration, Instant};

use dblp_offline::BuildProgress;
use indicatif::{HumanBytes, HumanCount, MultiProgress, ProgressBar, ProgressStyle};

/// Terminal rendering of [`BuildProgress`] events.
pub struct BuildBars {
    _multi: MultiProgress,
    dl_bar: Option<ProgressBar>,
    parse_bar: ProgressBar,
    dl_bar_style: ProgressStyle,
    parse_bar_style: ProgressStyle,
    write_bar_style: ProgressStyle,
    spinner_style: ProgressStyle,
    started: Cell<Option<Instant>>,
}

impl BuildBars {
    /// `download` adds a byte bar for the HTTP phase.
    pub fn new(download: bool) -> anyhow::Result<Self> {
        let multi = MultiProgress::new();

        let dl_bar_style = ProgressStyle::with_template(
            "{spinner:.cyan} {msg} [{bar:40.cyan/dim}] {bytes}/{total_bytes} ({bytes_per_sec}, eta {eta})",
        )?
        .progress_chars("=> ");
        let dl_unknown_style =
            ProgressStyle::with_template("{spinner:.cyan} {msg} {bytes} ({bytes_per_sec})")?;
        let parse_bar_style = ProgressStyle::with_template(
            "{spinner:.green} {msg} [{bar:40.green/dim}] {percent}% (eta {eta})",
        )?
        .progress_chars("=> ");
        let write_bar_style = ProgressStyle::with_template(
            "{spinner:.green} {msg} [{bar:40.green/dim}] {pos}/{len}",
        )?
        .progress_chars("=> ");
        let spinner_style = ProgressStyle::with_template("{spinner:.green} {msg}")?;

        let dl_bar = download.then(|| {
            let bar = multi.add(ProgressBar::new(0));
            bar.set_style(dl_unknown_style);
            bar.set_message("Connecting...");
            bar.enable_steady_tick(Duration::from_millis(120));
            bar
        });

        let parse_bar = multi.add(ProgressBar::new(0));
        parse_bar.set_style(spinner_style.clone());
        parse_bar.enable_steady_tick(Duration::from_millis(120));

        Ok(Self {
            _multi: multi,
            dl_bar,
            parse_bar,
            dl_bar_style,
            parse_bar_style,
            write_bar_style,
            spinner_style,
            started: Cell::new(None),
        })
    }

    pub fn handle(&self, event: BuildProgress) {
        match event {
            BuildProgress::Downloading {
                bytes_downloaded,
                total_bytes,
            } => self.downloading(bytes_downloaded, total_bytes),
            BuildProgress::Parsing {
                lines_processed,
                triples_parsed,
                publications_found,
                bytes_read,
                bytes_total,
            } => {
                self.finish_download();
                if self.started.get().is_none() {
                    self.started.set(Some(Instant::now()));
                }
                // Switch to a bar on the first event with a known size.
                if let Some(total) = bytes_total.filter(|&t| t > 0)
                    && self.parse_bar.length() == Some(0)
                {
                    self.parse_bar.set_length(total);
                    self.parse_bar.set_style(self.parse_bar_style.clone());
                }
                self.parse_bar.set_position(bytes_read);
                self.parse_bar.set_message(format!(
                    "{} lines, {} triples, {} publications",
                    HumanCount(lines_processed),
                    HumanCount(triples_parsed),
                    HumanCount(publications_found),
                ));
            }
            BuildProgress::Writing {
                records_written,
                records_total,
            } => {
                if self.parse_bar.length() != Some(records_total) {
                    self.parse_bar.set_length(records_total);
                    self.parse_bar.set_style(self.write_bar_style.clone());
                    self.parse_bar.set_message("Writing records");
                }
                self.parse_bar.set_position(records_written);
            }
            BuildProgress::RebuildingIndex => {
                self.finish_download();
                self.parse_bar.set_style(self.spinner_style.clone());
                self.parse_bar.set_message("Building full-text index...");
            }
            BuildProgress::Complete {
                publications,
                triples,
            } => {
                let elapsed = self
                    .started
                    .get()
                    .map(|s| format!(" in {:.0?}", s.elapsed()))
                    .unwrap_or_default();
                self.parse_bar.finish_with_message(format!(
                    "Indexed {} publications from {} triples{}",
                    HumanCount(publications),
                    HumanCount(triples),
                    elapsed
                ));
            }
        }
    }

    fn downloading(&self, bytes_downloaded: u64, total_bytes: Option<u64>) {
        let Some(dl_bar) = &self.dl_bar else {
            return;
        };
        dl_bar.set_message("dblp.nt.gz");
        if let Some(total) = total_bytes {
            if dl_bar.length() == Some(0) {
                dl_bar.set_length(total);
                dl_bar.set_style(self.dl_bar_style.clone());
            }
            dl_bar.set_position(bytes_downloaded);
            if bytes_downloaded >= total {
                self.finish_download();
            }
        } else {
            dl_bar.set_position(bytes_downloaded);
        }
    }

    fn finish_download(&self) {
        if let Some(dl_bar) = &self.dl_bar
            && !dl_bar.is_finished()
        {
            dl_bar.finish_with_message(format!(
                "Downloaded {} in {:.0?}",
                HumanBytes(dl_bar.position()),
                dl_bar.elapsed()
            ));
        }
    }

    /// Clear unfinished bars, e.g. after a failed build.
    pub fn abandon(&self) {
        if let Some(dl_bar) = &self.dl_bar
            && !dl_bar.is_finished()
        {
            dl_bar.abandon();
        }
        if !self.parse_bar.is_finished() {
            self.parse_bar.abandon();
        }
    }
}
