#[cfg(not(feature = "cli"))]
fn main() {
    eprintln!(
        "The adlib-seq CLI requires the \"cli\" feature. Rebuild with `--features cli` to enable it."
    );
}

#[cfg(feature = "cli")]
mod cli {
    use std::fs;
    use std::io::{self, Write};
    use std::path::PathBuf;

    use anyhow::{bail, Context};
    use clap::{Parser, ValueEnum};
    use serde::Serialize;

    use adlib_sequencer::{
        DriverVersion, RegisterLog, RegisterWrite, Sequencer, SequencerConfig, NUM_CHANNELS,
    };

    #[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
    enum OutputFormat {
        Text,
        Json,
    }

    #[derive(Parser)]
    #[command(name = "adlib-seq")]
    #[command(about = "Run AdLib sound data and dump the OPL register trace")]
    struct Args {
        /// Raw sound data file
        file: PathBuf,

        /// Program ids to start, in order
        #[arg(short, long = "program", required = true)]
        programs: Vec<u16>,

        /// Number of ticks to run
        #[arg(short, long, conflicts_with = "seconds")]
        ticks: Option<u32>,

        /// Run time in seconds at the configured tick rate
        #[arg(short, long)]
        seconds: Option<f32>,

        /// JSON configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Driver revision (1-4), overrides the configuration
        #[arg(long, value_parser = clap::value_parser!(u8).range(1..=4))]
        driver_version: Option<u8>,

        /// Sound effect volume applied to every start
        #[arg(long, default_value_t = 0xFF)]
        volume: u8,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,

        /// Pretty print JSON output
        #[arg(long)]
        pretty: bool,

        /// Print a channel summary to stderr when done
        #[arg(long)]
        summary: bool,
    }

    #[derive(Serialize)]
    struct TraceEntry {
        tick: u32,
        #[serde(flatten)]
        write: RegisterWrite,
    }

    fn load_config(args: &Args) -> anyhow::Result<SequencerConfig> {
        let mut config = match &args.config {
            Some(path) => SequencerConfig::from_json_file(path)
                .with_context(|| format!("loading config {}", path.display()))?,
            None => SequencerConfig::default(),
        };
        if let Some(version) = args.driver_version {
            config.version = match version {
                1 => DriverVersion::V1,
                2 => DriverVersion::V2,
                3 => DriverVersion::V3,
                _ => DriverVersion::V4,
            };
        }
        Ok(config)
    }

    fn tick_budget(args: &Args, config: &SequencerConfig) -> anyhow::Result<u32> {
        match (args.ticks, args.seconds) {
            (Some(ticks), _) => Ok(ticks),
            (None, Some(seconds)) if seconds.is_finite() && seconds >= 0.0 => {
                Ok((seconds * config.tick_rate_hz as f32).round() as u32)
            }
            (None, Some(seconds)) => bail!("invalid duration {seconds}"),
            (None, None) => Ok(config.tick_rate_hz * 10),
        }
    }

    pub fn run() -> anyhow::Result<()> {
        env_logger::init();
        let args = Args::parse();

        let config = load_config(&args)?;
        let ticks = tick_budget(&args, &config)?;
        let data = fs::read(&args.file)
            .with_context(|| format!("reading sound data {}", args.file.display()))?;
        log::info!(
            "Loaded {} bytes, {:?}, running {} ticks",
            data.len(),
            config.version,
            ticks
        );

        let sequencer = Sequencer::with_config(RegisterLog::new(), config);
        sequencer.init_chip();
        sequencer.set_sound_data(data);
        for &program in &args.programs {
            sequencer.start_song_with_volume(program, args.volume);
        }

        let mut trace: Vec<TraceEntry> = sequencer
            .with_sink(|log| log.take())
            .into_iter()
            .map(|write| TraceEntry { tick: 0, write })
            .collect();

        for tick in 1..=ticks {
            sequencer.tick();
            let writes = sequencer.with_sink(|log| log.take());
            trace.extend(writes.into_iter().map(|write| TraceEntry { tick, write }));
        }

        let stdout = io::stdout();
        let mut out = stdout.lock();
        match args.format {
            OutputFormat::Text => {
                for entry in &trace {
                    writeln!(
                        out,
                        "{:>6} {:#05x} {:#04x}",
                        entry.tick, entry.write.addr, entry.write.value
                    )?;
                }
            }
            OutputFormat::Json => {
                if args.pretty {
                    serde_json::to_writer_pretty(&mut out, &trace)?;
                } else {
                    serde_json::to_writer(&mut out, &trace)?;
                }
                writeln!(out)?;
            }
        }

        if args.summary {
            eprintln!("Register writes:   {}", trace.len());
            eprintln!("Refused starts:    {}", sequencer.preempted_requests());
            for chan in 0..NUM_CHANNELS {
                let channel = sequencer.channel(chan);
                if let Some(id) = channel.program_id() {
                    eprintln!(
                        "Channel {chan}: program {id}, {}",
                        if channel.is_playing() { "playing" } else { "idle" }
                    );
                }
            }
        }

        Ok(())
    }
}

#[cfg(feature = "cli")]
fn main() -> anyhow::Result<()> {
    cli::run()
}
