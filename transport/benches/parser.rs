use criterion::{Criterion, criterion_group, criterion_main};
use std::io::Cursor;

use transport::Reader;
use transport::parser::ProtocolParser;
use transport::reader::HandWrittenReader;

const STOP_OUTPUT: &str = "\n\x1a\x1apost-prompt\nBreakpoint 1, \n\x1a\x1aframe-begin 0 0x401136\n\n\x1a\x1aframe-function-name\nmain\n\x1a\x1aframe-args\n ()\n\x1a\x1aframe-source-begin\n at \n\x1a\x1aframe-source-file\nmain.c\n\x1a\x1aframe-source-file-end\n:\n\x1a\x1aframe-source-line\n10\n\x1a\x1aframe-source-end\n\n\x1a\x1aframe-end\n\n\x1a\x1adisplay-begin\n1\n\x1a\x1adisplay-number-end\n: \n\x1a\x1adisplay-expression\np\n\x1a\x1adisplay-expression-end\n = \n\x1a\x1adisplay-value\n{\n\x1a\x1afield-begin\nx\n\x1a\x1afield-name-end\n = \n\x1a\x1afield-value\n1\n\x1a\x1afield-end\n}\n\x1a\x1adisplay-end\n\n\x1a\x1apre-prompt\n(gdb) \n\x1a\x1aprompt\n";

pub fn tokenizer_benchmark(c: &mut Criterion) {
    c.bench_function("tokenizer", |b| {
        b.iter(|| {
            let mut reader = HandWrittenReader::new(Cursor::new(STOP_OUTPUT));
            while let Ok(Some(_)) = reader.poll_line() {}
        })
    });
}

pub fn protocol_parser_benchmark(c: &mut Criterion) {
    let mut lines = Vec::new();
    let mut reader = HandWrittenReader::new(Cursor::new(STOP_OUTPUT));
    while let Ok(Some(line)) = reader.poll_line() {
        lines.push(line);
    }

    c.bench_function("protocol parser", |b| {
        b.iter(|| {
            let mut parser = ProtocolParser::new();
            lines
                .iter()
                .cloned()
                .flat_map(|line| parser.on_line(line))
                .count()
        })
    });
}

criterion_group!(benches, tokenizer_benchmark, protocol_parser_benchmark);
criterion_main!(benches);
