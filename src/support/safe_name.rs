//-
// Copyright (c) 2020, 2024, Jason Lingle
//
// This file is part of Pigeonhole.
//
// Pigeonhole is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free
// Software Foundation, either version 3 of the License, or (at your option)
// any later version.
//
// Pigeonhole is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or
// FITNESS FOR A PARTICULAR PURPOSE. See the GNU General Public License for
// more details.
//
// You should have received a copy of the GNU General Public License along with
// Pigeonhole. If not, see <http://www.gnu.org/licenses/>.

/// Determine whether the given name is usable as a single mailbox name
/// segment.
///
/// This excludes empty names, the hierarchy delimiter, and things that have
/// special meaning within IMAP. Names starting with `#` are reserved for
/// namespaces, which are never created through this path.
pub fn is_safe_name(name: &str, delimiter: char) -> bool {
    !name.is_empty() &&
        name.find(delimiter).is_none() &&
        name.chars().next() != Some('#') &&
        // Don't allow any ASCII control characters
        name.find(|c| c < ' ' || c == '\x7F').is_none() &&
        // * and % are the LIST wildcards
        name.find(|c| c == '*' || c == '%').is_none()
}
