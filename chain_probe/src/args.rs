/**********************************************************************

Copyright (C) 2021 by reddal

This program is free software: you can redistribute it and/or modify
it under the terms of the GNU General Public License as published by
the Free Software Foundation, either version 3 of the License, or
(at your option) any later version.

This program is distributed in the hope that it will be useful,
but WITHOUT ANY WARRANTY; without even the implied warranty of
MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
GNU General Public License for more details.

You should have received a copy of the GNU General Public License
along with this program.  If not, see <https://www.gnu.org/licenses/>.

**********************************************************************/

use super::config::{Format, LogOutput};
use clap::Parser;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "chain_probe")]
pub struct AppOptions {
	/// Read config from file. STDIN will be used if not specified.
	#[arg(short, long, value_name = "FILE")]
	config: Option<PathBuf>,

	/// Set the format of the config file. Can be 'toml' (default) or 'json'.
	#[arg(short, long)]
	format: Option<Format>,

	/// Test this URL instead of the one in the config.
	#[arg(short, long, value_name = "URL")]
	url: Option<String>,

	/// Resolve the URL host through each chain before connecting.
	#[arg(long)]
	resolve: bool,

	/// Set the log level. Must be one of ["trace", "debug", "info" (default), "warn", "error", "off"]
	#[arg(long, value_name = "LEVEL")]
	log: Option<log::LevelFilter>,

	/// Set the output for log. Can be '@stdout', '@stderr', '@none' or a file path.
	#[arg(long, value_name = "FILE")]
	log_out: Option<String>,

	/// Print version.
	#[arg(long)]
	version: bool,
}

pub enum Action {
	CheckVersion,
	Probe(ProbeAction),
}

/// Everything from the command line that overrides the config.
pub struct ProbeAction {
	pub path: Option<PathBuf>,
	pub format: Format,
	pub url: Option<String>,
	pub resolve: bool,
	pub log: Option<log::LevelFilter>,
	pub log_out: Option<Option<LogOutput>>,
}

impl AppOptions {
	pub fn new_from_args() -> Self {
		Self::parse()
	}

	pub fn into_action(self) -> Action {
		if self.version {
			return Action::CheckVersion;
		}
		let format = self.format.unwrap_or_else(|| {
			let is_json = self
				.config
				.as_ref()
				.and_then(|p| p.extension())
				.map_or(false, |ext| ext.eq_ignore_ascii_case("json"));
			if is_json {
				Format::Json
			} else {
				Format::default()
			}
		});
		Action::Probe(ProbeAction {
			path: self.config,
			format,
			url: self.url,
			resolve: self.resolve,
			log: self.log,
			log_out: self.log_out.as_deref().map(LogOutput::from_str),
		})
	}
}
