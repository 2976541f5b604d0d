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

use crate::BoxStdErr;
use fern::colors::{Color, ColoredLevelConfig};
use log::{Level, LevelFilter};
use proxy_chain::{AdapterConfig, BuildError, ProxyAdapter, SessionCache};
use serde::Deserialize;
use std::{borrow::Cow, collections::HashSet, str::FromStr, sync::Arc};

pub const DEFAULT_URL: &str = "https://api.ipify.org/";

#[derive(Clone, Copy, Default)]
pub enum Format {
	#[default]
	Toml,
	Json,
}

impl FromStr for Format {
	type Err = Cow<'static, str>;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let mut s = s.to_string();
		s.make_ascii_lowercase();
		Ok(match s.as_str() {
			"toml" => Self::Toml,
			"json" => Self::Json,
			_ => return Err("must be either 'toml' or 'json'".into()),
		})
	}
}

// ------------------- Logging -------------------
const STR_STDOUT: &str = "@stdout";
const STR_STDERR: &str = "@stderr";
const STR_NONE: &str = "@none";

#[derive(Debug, PartialEq, Eq)]
pub enum LogOutput {
	Stdout,
	Stderr,
	File(String),
}

impl LogOutput {
	pub fn is_colorful(&self) -> bool {
		matches!(self, Self::Stdout | Self::Stderr)
	}

	/// `None` means no log at all.
	pub fn from_str(s: &str) -> Option<Self> {
		match s {
			STR_NONE => None,
			STR_STDOUT | "" => Some(LogOutput::Stdout),
			STR_STDERR => Some(LogOutput::Stderr),
			_ => Some(LogOutput::File(s.to_string())),
		}
	}
}

fn deserialize_output<'de, D>(deserializer: D) -> Result<Option<LogOutput>, D::Error>
where
	D: serde::Deserializer<'de>,
{
	let s = <String as Deserialize<'de>>::deserialize(deserializer)?;
	Ok(LogOutput::from_str(&s))
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Log {
	#[serde(default = "default_log_level")]
	pub level: LevelFilter,
	#[serde(default = "default_output", deserialize_with = "deserialize_output")]
	pub output: Option<LogOutput>,
}

impl Log {
	/// Initialize logger.
	///
	/// DO NOT call this function more than once!
	pub fn init_logger(&self) -> Result<(), BoxStdErr> {
		let output = match &self.output {
			Some(o) => o,
			None => return Ok(()),
		};
		let time_format =
			time::format_description::parse("[year]-[month]-[day]T[hour]:[minute]:[second]Z")?;
		let colors = output.is_colorful().then(|| {
			ColoredLevelConfig::new()
				.info(Color::Blue)
				.trace(Color::Magenta)
		});
		let dispatch = fern::Dispatch::new()
			.level(self.level)
			.format(move |out, message, record| {
				let time = time::OffsetDateTime::now_utc()
					.format(&time_format)
					.unwrap_or_default();
				let level: Cow<str> = match &colors {
					Some(colors) => colors.color(record.level()).to_string().into(),
					None => record.level().as_str().into(),
				};
				let target = if record.level() <= Level::Info {
					""
				} else {
					record.target()
				};
				out.finish(format_args!("[{time} {level} {target}] {message}"));
			});
		match output {
			LogOutput::Stdout => dispatch.chain(std::io::stdout()),
			LogOutput::Stderr => dispatch.chain(std::io::stderr()),
			LogOutput::File(f) => dispatch.chain(fern::log_file(f)?),
		}
		.apply()?;
		Ok(())
	}
}

impl Default for Log {
	fn default() -> Self {
		Log {
			level: default_log_level(),
			output: default_output(),
		}
	}
}

fn default_log_level() -> LevelFilter {
	LevelFilter::Info
}

#[allow(clippy::unnecessary_wraps)]
fn default_output() -> Option<LogOutput> {
	Some(LogOutput::Stdout)
}

// ------------------- Config -------------------

/// One chain to probe. `chain` lists proxy names from the outermost
/// to the innermost.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TestConfig {
	pub name: String,
	pub chain: Vec<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum ChainError {
	#[error("test '{0}' has an empty chain")]
	Empty(String),
	#[error("unknown proxy '{0}'")]
	UnknownProxy(String),
	#[error("duplicate proxy name '{0}'")]
	DuplicateName(String),
	#[error("cannot build proxy '{name}' ({source})")]
	Build { name: String, source: BuildError },
}

#[derive(Deserialize)]
pub struct Config {
	#[serde(default = "default_url")]
	pub url: String,
	#[serde(default)]
	pub resolve: bool,
	#[serde(default)]
	pub log: Log,
	#[serde(default)]
	pub proxies: Vec<AdapterConfig>,
	#[serde(default)]
	pub tests: Vec<TestConfig>,
}

fn default_url() -> String {
	DEFAULT_URL.into()
}

impl Config {
	pub fn parse(s: &str, format: Format) -> Result<Self, BoxStdErr> {
		Ok(match format {
			Format::Toml => toml::from_str(s)?,
			Format::Json => serde_json::from_str(s)?,
		})
	}

	/// Check that every test refers to known proxies.
	pub fn check(&self) -> Result<(), ChainError> {
		let mut names = HashSet::with_capacity(self.proxies.len());
		for p in &self.proxies {
			if !names.insert(p.name()) {
				return Err(ChainError::DuplicateName(p.name().into()));
			}
		}
		for t in &self.tests {
			if t.chain.is_empty() {
				return Err(ChainError::Empty(t.name.clone()));
			}
			if let Some(n) = t.chain.iter().find(|n| !names.contains(n.as_str())) {
				return Err(ChainError::UnknownProxy(n.clone()));
			}
		}
		Ok(())
	}

	/// Build fresh adapters for `test` from the innermost one outwards,
	/// each using the previous one as its upstream.
	pub fn build_chain(
		&self,
		test: &TestConfig,
		cache: &SessionCache,
	) -> Result<Arc<dyn ProxyAdapter>, ChainError> {
		let mut upstream: Option<Arc<dyn ProxyAdapter>> = None;
		for name in test.chain.iter().rev() {
			let conf = self
				.proxies
				.iter()
				.find(|p| p.name() == name)
				.ok_or_else(|| ChainError::UnknownProxy(name.clone()))?;
			let mut adapter = conf
				.clone()
				.build(cache)
				.map_err(|source| ChainError::Build {
					name: name.clone(),
					source,
				})?;
			if let Some(upstream) = upstream.take() {
				adapter.set_dialer(upstream);
			}
			upstream = Some(Arc::from(adapter));
		}
		upstream.ok_or_else(|| ChainError::Empty(test.name.clone()))
	}
}
