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

#![deny(clippy::all)]
#![warn(clippy::pedantic)]

mod args;
mod config;
mod table;

use args::{Action, AppOptions, ProbeAction};
use config::Config;
use log::{debug, info};
use proxy_chain::{Proxy, SessionCache};
use std::{
	fs::File,
	io::{self, Read},
	path::Path,
};
use table::{Row, Table};
use tokio::runtime::Runtime;

type BoxStdErr = Box<dyn std::error::Error + Send + Sync>;

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, thiserror::Error)]
enum Error {
	#[error("[IO error] {0}")]
	Io(#[from] io::Error),
	#[error("[config] {0}")]
	Config(BoxStdErr),
	#[error("[runtime] {0}")]
	Runtime(BoxStdErr),
}

fn read_conf_str(path: Option<&Path>) -> Result<String, io::Error> {
	let mut conf_str = String::with_capacity(1024);
	if let Some(path) = path {
		File::open(path)?.read_to_string(&mut conf_str)?;
	} else {
		io::stdin().read_to_string(&mut conf_str)?;
	}
	Ok(conf_str)
}

fn make_config(action: ProbeAction) -> Result<Config, Error> {
	let conf_str = read_conf_str(action.path.as_deref())?;
	let mut conf = Config::parse(&conf_str, action.format).map_err(Error::Config)?;
	if let Some(url) = action.url {
		conf.url = url;
	}
	conf.resolve |= action.resolve;
	if let Some(level) = action.log {
		conf.log.level = level;
	}
	if let Some(output) = action.log_out {
		conf.log.output = output;
	}
	conf.check().map_err(|e| Error::Config(e.into()))?;
	Ok(conf)
}

fn probe(conf: &Config) -> Result<Vec<Row>, Error> {
	let cache = SessionCache::default();
	let mut proxies = Vec::with_capacity(conf.tests.len());
	for test in &conf.tests {
		let adapter = conf
			.build_chain(test, &cache)
			.map_err(|e| Error::Config(e.into()))?;
		proxies.push(Proxy::new(adapter));
	}

	let rt = Runtime::new().map_err(|e| Error::Runtime(e.into()))?;
	let results = rt.block_on(futures::future::join_all(
		proxies.iter().map(|p| p.url_test(&conf.url, conf.resolve)),
	));

	Ok(conf
		.tests
		.iter()
		.zip(results)
		.map(|(test, res)| {
			match &res {
				Ok(report) => info!("Test '{}' finished in {} ms", test.name, report.latency_ms),
				Err(e) => info!("Test '{}' failed ({})", test.name, e),
			}
			Row::new(test.name.clone(), &test.chain, &res)
		})
		.collect())
}

fn run(action: ProbeAction) -> Result<(), Error> {
	let conf = make_config(action)?;
	conf.log.init_logger().map_err(Error::Config)?;
	debug!(
		"Probing '{}' with {} test(s), resolve: {}",
		conf.url,
		conf.tests.len(),
		conf.resolve
	);
	let rows = probe(&conf)?;
	print!("{}", Table(&rows));
	Ok(())
}

fn main() {
	let action = match AppOptions::new_from_args().into_action() {
		Action::CheckVersion => {
			println!("{}", VERSION);
			return;
		}
		Action::Probe(a) => a,
	};
	if let Err(err) = run(action) {
		println!("Error happened during initialization:\n {}\n", err);
		std::process::exit(match err {
			Error::Io(_) => exitcode::IOERR,
			Error::Config(_) => exitcode::CONFIG,
			Error::Runtime(_) => exitcode::SOFTWARE,
		});
	}
}
