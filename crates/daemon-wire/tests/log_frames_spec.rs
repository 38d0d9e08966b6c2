use anyhow::Result;
use daemon_wire::{decode, encode_frame, render, LogError, StreamOrigin};

fn frames(lines: &[(StreamOrigin, &str)]) -> Vec<u8> {
    lines
        .iter()
        .flat_map(|(origin, payload)| encode_frame(*origin, payload.as_bytes()))
        .collect()
}

#[test]
fn test_n_frames_yield_n_lines_in_order() -> Result<()> {
    let input: Vec<(StreamOrigin, String)> = (0..25)
        .map(|i| {
            let origin = if i % 3 == 0 {
                StreamOrigin::Stderr
            } else {
                StreamOrigin::Stdout
            };
            (origin, format!("2024-01-01T00:00:{i:02}.000000000Z line {i}\n"))
        })
        .collect();
    let borrowed: Vec<(StreamOrigin, &str)> =
        input.iter().map(|(o, s)| (*o, s.as_str())).collect();

    let lines = decode(&frames(&borrowed))?;

    assert_eq!(lines.len(), 25);
    for (i, line) in lines.iter().enumerate() {
        assert_eq!(line.text, format!("line {i}"));
        assert_eq!(line.origin, input[i].0);
    }
    Ok(())
}

#[test]
fn test_truncated_frame_yields_no_lines() {
    let first = encode_frame(StreamOrigin::Stdout, b"2024-01-01T00:00:00Z first\n");
    let mut bytes = first.clone();
    bytes.extend(encode_frame(
        StreamOrigin::Stdout,
        b"2024-01-01T00:00:01Z second\n",
    ));

    // A cut on the frame boundary is a complete stream, not a truncated one.
    for cut in (1..bytes.len()).filter(|cut| *cut != first.len()) {
        match decode(&bytes[..cut]) {
            Err(LogError::Truncated { .. }) => {}
            other => panic!("cut at {cut} should be truncated, got {other:?}"),
        }
    }
}

#[test]
fn test_passing_job_renders_for_display() -> Result<()> {
    let bytes = frames(&[
        (StreamOrigin::Stdout, "2024-01-01T00:00:00 all tests passed\n"),
        (
            StreamOrigin::Stderr,
            "2024-01-01T00:00:01.5Z \u{1b}[1m\u{1b}[32m(pass)\u{1b}[0m sum > adds\n",
        ),
    ]);

    let rendered = render(&decode(&bytes)?);

    assert_eq!(
        rendered,
        "[2024-01-01 00:00:00] all tests passed\n[2024-01-01 00:00:01] (✓) sum > adds"
    );
    Ok(())
}

#[test]
fn test_text_keeps_inner_spaces_and_empty_lines() -> Result<()> {
    let bytes = frames(&[
        (StreamOrigin::Stdout, "2024-01-01T00:00:00Z   indented  text\n"),
        (StreamOrigin::Stdout, "2024-01-01T00:00:00Z \n"),
    ]);

    let lines = decode(&bytes)?;
    assert_eq!(lines[0].text, "  indented  text");
    assert_eq!(lines[1].text, "");
    Ok(())
}
