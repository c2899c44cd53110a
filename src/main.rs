//! Command-line demo: count occurrences of a regexp separated by a
//! separator regexp in the bytes read from stdin.
//!
//! ```text
//! echo -n "1,2,3" | recount '[0-9]+' ','
//! ```

use std::env;
use std::io::Read;
use std::process::ExitCode;

use recount::{AdvancedCountingScanner, CountingScanner, Fsm};

fn usage() -> ExitCode {
    eprintln!("usage: recount [--basic] <regexp> <separator>  (input on stdin)");
    ExitCode::FAILURE
}

fn main() -> ExitCode {
    let mut args: Vec<String> = env::args().skip(1).collect();
    let basic = args.first().map(String::as_str) == Some("--basic");
    if basic {
        args.remove(0);
    }
    let [re_pattern, sep_pattern] = args.as_slice() else {
        return usage();
    };

    let re = match Fsm::parse(re_pattern) {
        Ok(fsm) => fsm,
        Err(err) => {
            eprintln!("recount: bad regexp: {err}");
            return ExitCode::FAILURE;
        }
    };
    let sep = match Fsm::parse(sep_pattern) {
        Ok(fsm) => fsm,
        Err(err) => {
            eprintln!("recount: bad separator: {err}");
            return ExitCode::FAILURE;
        }
    };

    let mut input = Vec::new();
    if let Err(err) = std::io::stdin().read_to_end(&mut input) {
        eprintln!("recount: {err}");
        return ExitCode::FAILURE;
    }

    let counts = if basic {
        CountingScanner::new(&re, &sep).run(&input)
    } else {
        match AdvancedCountingScanner::new(&re, &sep) {
            Ok(scanner) => scanner.run(&input),
            Err(err) => {
                eprintln!("recount: {err}");
                return ExitCode::FAILURE;
            }
        }
    };

    println!("{}", counts[0]);
    ExitCode::SUCCESS
}
