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

use proxy_chain::{probe, UrlTestReport};
use std::fmt::{self, Display, Write};

const MAX_BODY_CHARS: usize = 64;
const HEADERS: [&str; 4] = ["name", "chain", "latency_ms", "result"];

pub struct Row {
	pub name: String,
	pub chain: String,
	pub latency_ms: u16,
	pub result: String,
}

impl Row {
	pub fn new(
		name: String,
		chain: &[String],
		res: &Result<UrlTestReport, probe::Error>,
	) -> Self {
		let (latency_ms, result) = match res {
			Ok(report) => {
				let body = String::from_utf8_lossy(&report.body);
				(report.latency_ms, body.trim().chars().take(MAX_BODY_CHARS).collect())
			}
			Err(e) => (0, e.to_string()),
		};
		Self {
			name,
			chain: chain.join(" -> "),
			latency_ms,
			result,
		}
	}

	fn cells(&self) -> [Cow<'_>; 4] {
		[
			Cow::Borrowed(&self.name),
			Cow::Borrowed(&self.chain),
			Cow::Owned(self.latency_ms.to_string()),
			Cow::Borrowed(&self.result),
		]
	}
}

type Cow<'a> = std::borrow::Cow<'a, str>;

/// Right-aligned text table.
pub struct Table<'a>(pub &'a [Row]);

impl Display for Table<'_> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let mut widths = HEADERS.map(|h| h.chars().count());
		for row in self.0 {
			for (w, cell) in widths.iter_mut().zip(row.cells()) {
				*w = (*w).max(cell.chars().count());
			}
		}
		let mut line = String::new();
		let mut write_line = |f: &mut fmt::Formatter<'_>, cells: [Cow<'_>; 4]| {
			line.clear();
			for (i, (cell, w)) in cells.iter().zip(widths).enumerate() {
				if i > 0 {
					line.push_str(" | ");
				}
				write!(line, "{:>w$}", cell, w = w)?;
			}
			writeln!(f, "{}", line)
		};
		write_line(f, HEADERS.map(Cow::Borrowed))?;
		for row in self.0 {
			write_line(f, row.cells())?;
		}
		Ok(())
	}
}
