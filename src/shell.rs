use std::io::Write;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use log::debug;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::mpsc;

use crate::cities::{find_city, CITIES};
use crate::data::road::{NodeId, RoadGraph};
use crate::errors::{Error, ErrorKind, Result};
use crate::etl::provider::MapProvider;
use crate::etl::CityEtl;
use crate::session::{LoadOutcome, Phase, Selection, Session};

const HELP: &str = "\
Commands:
  cities            list the cities
  city <name>       load the road network of a city
  nodes [filter]    list intersections as '<id>  <name>'
  source <id>       choose the start intersection
  target <id>       choose the destination intersection
  find              find the shortest path and draw the map
  status            show the current selection
  quit              leave";

#[derive(Debug, Clone, PartialEq)]
pub enum ShellCommand {
    Help,
    Cities,
    City(String),
    Nodes(String),
    Source(NodeId),
    Target(NodeId),
    Find,
    Status,
    Quit,
}

impl FromStr for ShellCommand {
    type Err = Error;

    fn from_str(line: &str) -> Result<Self> {
        let line = line.trim();
        let (word, rest) = line
            .split_once(char::is_whitespace)
            .map(|(word, rest)| (word, rest.trim()))
            .unwrap_or((line, ""));
        let usage = |text: &str| Error::new(ErrorKind::Other, format!("Usage: {}", text));

        match word.to_lowercase().as_str() {
            "help" | "?" => Ok(ShellCommand::Help),
            "cities" => Ok(ShellCommand::Cities),
            "city" if rest.is_empty() => Err(usage("city <name>")),
            "city" => Ok(ShellCommand::City(rest.to_string())),
            "nodes" => Ok(ShellCommand::Nodes(rest.to_string())),
            "source" | "from" if rest.is_empty() => Err(usage("source <id>")),
            "source" | "from" => Ok(ShellCommand::Source(rest.parse()?)),
            "target" | "to" if rest.is_empty() => Err(usage("target <id>")),
            "target" | "to" => Ok(ShellCommand::Target(rest.parse()?)),
            "find" => Ok(ShellCommand::Find),
            "status" => Ok(ShellCommand::Status),
            "quit" | "exit" => Ok(ShellCommand::Quit),
            other => Err(Error::new(ErrorKind::Other, format!("Unknown command '{}'. Type 'help'.", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

pub struct LoadEvent {
    generation: u64,
    result: Result<RoadGraph>,
}

/// Line-oriented front end over a [`Session`]. City loads run as tokio tasks
/// and report back through a channel, so the shell keeps reading commands
/// while a city downloads.
pub struct Shell<P, W> {
    session: Session,
    etl: Arc<CityEtl<P>>,
    output_path: PathBuf,
    list_limit: usize,
    events_tx: mpsc::UnboundedSender<LoadEvent>,
    events_rx: mpsc::UnboundedReceiver<LoadEvent>,
    out: W,
}

impl<P: MapProvider + 'static, W: Write> Shell<P, W> {
    pub fn new(session: Session, etl: Arc<CityEtl<P>>, output_path: PathBuf, list_limit: usize, out: W) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Shell {
            session,
            etl,
            output_path,
            list_limit,
            events_tx,
            events_rx,
            out,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn output(&self) -> &W {
        &self.out
    }

    /// Runs one command. Command failures are reported to the user; only
    /// output errors are returned.
    pub fn handle_line(&mut self, line: &str) -> Result<Flow> {
        if line.trim().is_empty() {
            return Ok(Flow::Continue);
        }
        let result = line.parse::<ShellCommand>().and_then(|command| self.execute(command));
        match result {
            Ok(flow) => Ok(flow),
            Err(err) if err.is(ErrorKind::Io) => Err(err),
            Err(err) => {
                self.report(&err)?;
                Ok(Flow::Continue)
            },
        }
    }

    fn report(&mut self, err: &Error) -> Result<()> {
        match err.kind {
            ErrorKind::MissingSelection | ErrorKind::InvalidState => writeln!(self.out, "Warning: {}", err)?,
            _ => writeln!(self.out, "Error: {}", err)?,
        }
        Ok(())
    }

    pub fn execute(&mut self, command: ShellCommand) -> Result<Flow> {
        debug!(command = format!("{:?}", command); "Shell command");
        match command {
            ShellCommand::Help => writeln!(self.out, "{}", HELP)?,
            ShellCommand::Cities => {
                for city in CITIES {
                    writeln!(self.out, "  {}", city)?;
                }
            },
            ShellCommand::City(name) => {
                let city = find_city(&name).ok_or_else(|| {
                    Error::new(ErrorKind::Other, format!("Unknown city '{}'. Type 'cities' for the list.", name))
                })?;
                self.spawn_load(city);
                writeln!(self.out, "Loading {}...", city)?;
            },
            ShellCommand::Nodes(filter) => self.list_nodes(&filter)?,
            ShellCommand::Source(id) => {
                let selection = self.session.select_source(id)?;
                writeln!(self.out, "Source: {}", describe(selection))?;
            },
            ShellCommand::Target(id) => {
                let selection = self.session.select_target(id)?;
                writeln!(self.out, "Target: {}", describe(selection))?;
            },
            ShellCommand::Find => self.find()?,
            ShellCommand::Status => self.status()?,
            ShellCommand::Quit => return Ok(Flow::Quit),
        }
        Ok(Flow::Continue)
    }

    fn spawn_load(&mut self, city: &str) {
        let ticket = self.session.begin_load(city);
        let etl = Arc::clone(&self.etl);
        let events_tx = self.events_tx.clone();
        tokio::spawn(async move {
            let result = etl.process(&ticket.city, &ticket.token).await;
            // The receiver only goes away when the shell is shutting down.
            let _ = events_tx.send(LoadEvent { generation: ticket.generation, result });
        });
    }

    fn list_nodes(&mut self, filter: &str) -> Result<()> {
        let Some(city) = self.session.city() else {
            return Err(Error::new(ErrorKind::InvalidState, "Select a city first."));
        };
        let mut shown = 0;
        let mut total = 0;
        for (id, label) in city.catalog.matching(filter) {
            total += 1;
            if shown < self.list_limit {
                writeln!(self.out, "  {:>12}  {}", id, label)?;
                shown += 1;
            }
        }
        if total > shown {
            writeln!(self.out, "  ... and {} more, narrow the list with 'nodes <filter>'", total - shown)?;
        }
        if total == 0 {
            writeln!(self.out, "No intersection matches '{}'.", filter)?;
        }
        Ok(())
    }

    fn find(&mut self) -> Result<()> {
        let outcome = self.session.find_path()?;
        outcome.canvas.save(&self.output_path)?;

        writeln!(
            self.out,
            "Route from {} to {}: {} intersections, {:.2} km",
            describe(outcome.source),
            describe(outcome.target),
            outcome.route.nodes.len(),
            outcome.route.length / 1000.0,
        )?;
        let streets = outcome.route.street_names(outcome.graph);
        if !streets.is_empty() {
            writeln!(self.out, "Via: {}", streets.join(" -> "))?;
        }
        writeln!(self.out, "Map written to {}", self.output_path.display())?;
        Ok(())
    }

    fn status(&mut self) -> Result<()> {
        let phase = match self.session.phase() {
            Phase::NoCityLoaded => "no city loaded",
            Phase::Loading => "loading",
            Phase::CityLoaded => "city loaded",
            Phase::PathDisplayed => "path displayed",
        };
        writeln!(self.out, "State: {}", phase)?;
        if let Some(city) = self.session.loading_city() {
            writeln!(self.out, "Loading: {}", city)?;
        }
        if let Some(city) = self.session.city() {
            writeln!(self.out, "City: {} ({} intersections)", city.name, city.catalog.len())?;
        }
        let source = self.session.source().map(describe).unwrap_or_else(|| "-".to_string());
        let target = self.session.target().map(describe).unwrap_or_else(|| "-".to_string());
        writeln!(self.out, "Source: {}", source)?;
        writeln!(self.out, "Target: {}", target)?;
        Ok(())
    }

    pub fn apply_load_event(&mut self, event: LoadEvent) -> Result<LoadOutcome> {
        let outcome = self.session.finish_load(event.generation, event.result);
        match &outcome {
            LoadOutcome::Loaded { city, nodes } => {
                writeln!(self.out, "Loaded {}: {} intersections. Use 'nodes [filter]' to list them.", city, nodes)?;
            },
            LoadOutcome::Failed { city, message } => {
                writeln!(self.out, "Error: could not load {}: {}", city, message)?;
            },
            LoadOutcome::Discarded => (),
        }
        Ok(outcome)
    }

    /// Waits until the load in flight has either finished or failed.
    pub async fn wait_for_load(&mut self) -> Result<LoadOutcome> {
        while self.session.phase() == Phase::Loading {
            let Some(event) = self.events_rx.recv().await else {
                break;
            };
            let outcome = self.apply_load_event(event)?;
            if outcome != LoadOutcome::Discarded {
                return Ok(outcome);
            }
        }
        Err(Error::new(ErrorKind::InvalidState, "No city is loading."))
    }

    fn prompt(&mut self) -> Result<()> {
        write!(self.out, "> ")?;
        self.out.flush()?;
        Ok(())
    }

    /// Reads commands from `input` until it ends or `quit` is entered.
    pub async fn run<R: AsyncBufRead + Unpin>(&mut self, input: R) -> Result<()> {
        let mut lines = input.lines();
        writeln!(self.out, "Type 'help' for the list of commands.")?;
        self.prompt()?;
        loop {
            tokio::select! {
                line = lines.next_line() => {
                    let Some(line) = line? else {
                        break;
                    };
                    if self.handle_line(&line)? == Flow::Quit {
                        break;
                    }
                    self.prompt()?;
                },
                Some(event) = self.events_rx.recv() => {
                    writeln!(self.out)?;
                    self.apply_load_event(event)?;
                    self.prompt()?;
                },
            }
        }
        Ok(())
    }
}

fn describe(selection: &Selection) -> String {
    format!("{} [{}]", selection.label, selection.id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        assert_eq!("help".parse::<ShellCommand>().unwrap(), ShellCommand::Help);
        assert_eq!("  CITY  Tizi Ouzou ".parse::<ShellCommand>().unwrap(), ShellCommand::City("Tizi Ouzou".to_string()));
        assert_eq!("nodes".parse::<ShellCommand>().unwrap(), ShellCommand::Nodes(String::new()));
        assert_eq!("nodes rue".parse::<ShellCommand>().unwrap(), ShellCommand::Nodes("rue".to_string()));
        assert_eq!("source 42".parse::<ShellCommand>().unwrap(), ShellCommand::Source(NodeId(42)));
        assert_eq!("to 7".parse::<ShellCommand>().unwrap(), ShellCommand::Target(NodeId(7)));
        assert_eq!("exit".parse::<ShellCommand>().unwrap(), ShellCommand::Quit);
    }

    #[test]
    fn test_parse_errors() {
        assert!("city".parse::<ShellCommand>().unwrap_err().message.starts_with("Usage"));
        assert!("source".parse::<ShellCommand>().is_err());
        assert!("source abc".parse::<ShellCommand>().unwrap_err().is(ErrorKind::NodeNotFound));
        assert!("fly".parse::<ShellCommand>().unwrap_err().message.contains("Unknown command"));
    }
}
