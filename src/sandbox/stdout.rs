/// Reduce test-run stdout to the lines that look like assertion failures.
///
/// A line is kept when it starts with `>` or `E` (pytest failure markers) or
/// mentions `assert`; the line after it is kept too. The last line is never
/// a candidate because it has no follower.
pub fn condense(stdout: &str) -> Vec<String> {
    let lines: Vec<&str> = stdout.lines().collect();
    let mut failures = Vec::new();

    for (index, line) in lines.iter().enumerate() {
        if index + 1 == lines.len() || line.trim().is_empty() {
            continue;
        }
        if line.starts_with('>') || line.starts_with('E') || line.contains("assert") {
            failures.push(line.to_string());
            failures.push(lines[index + 1].to_string());
        }
    }

    failures
}
