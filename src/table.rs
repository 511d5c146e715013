// Copyright 2025 Chisomo Makombo Sakala
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
/// Renders a single-column ASCII table with centred cells:
///
/// ```text
/// +------------+
/// |   header   |
/// +------------+
/// |   row 1    |
/// | longer row |
/// +------------+
/// ```
pub fn render(header: &str, rows: &[String]) -> String {
  let width = rows
    .iter()
    .map(|row| row.chars().count())
    .chain(std::iter::once(header.chars().count()))
    .max()
    .unwrap_or(0);

  let border = format!("+{}+", "-".repeat(width + 2));
  let line = |cell: &str| format!("| {:^width$} |", cell, width = width);

  let mut out = vec![border.clone(), line(header), border.clone()];
  if !rows.is_empty() {
    out.extend(rows.iter().map(|row| line(row)));
    out.push(border);
  }
  out.join("\n")
}
