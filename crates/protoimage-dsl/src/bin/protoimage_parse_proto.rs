use std::{env, fs};

use protoimage_dsl::parse_proto;

fn main() {
    let mut args = env::args().skip(1);
    let Some(path) = args.next() else {
        eprintln!("usage: protoimage_parse_proto <file.proto>");
        std::process::exit(2);
    };
    if args.next().is_some() {
        eprintln!("usage: protoimage_parse_proto <file.proto>");
        std::process::exit(2);
    }

    let text = match fs::read_to_string(&path) {
        Ok(v) => v,
        Err(err) => {
            eprintln!("failed to read `{path}`: {err}");
            std::process::exit(2);
        }
    };

    match parse_proto(&text) {
        Ok(file) => {
            println!(
                "ok({}): package={} imports={} messages={} enums={} services={} extends={}",
                file.syntax.as_str(),
                file.package.as_ref().map(|p| p.name.value.as_str()).unwrap_or("-"),
                file.imports.len(),
                file.messages.len(),
                file.enums.len(),
                file.services.len(),
                file.extends.len()
            );
        }
        Err(err) => {
            eprintln!("{path}:{err}");
            std::process::exit(1);
        }
    }
}
