use std::collections::BTreeSet;

use nrelay::{KeysSigner, Pubkey};
use tracing::error;

pub struct Args {
    pub relays: Vec<String>,
    pub pubkey: Option<Pubkey>,
    pub signer: Option<KeysSigner>,
    pub datapath: Option<String>,
    pub debug: bool,
}

impl Args {
    // parse arguments, return set of unrecognized args
    pub fn parse(args: &[String]) -> (Self, BTreeSet<String>) {
        let mut unrecognized_args = BTreeSet::new();
        let mut res = Args {
            relays: vec![],
            pubkey: None,
            signer: None,
            datapath: None,
            debug: false,
        };

        let mut i = 0;
        let len = args.len();
        while i < len {
            let arg = &args[i];

            if arg == "--debug" {
                res.debug = true;
            } else if arg == "--pub" || arg == "--npub" {
                i += 1;
                let Some(pubstr) = args.get(i) else {
                    error!("pub argument missing?");
                    continue;
                };

                match Pubkey::parse(pubstr) {
                    Ok(pk) => res.pubkey = Some(pk),
                    Err(_) => error!(
                        "failed to parse {} argument. Make sure to use hex or npub.",
                        arg
                    ),
                }
            } else if arg == "--sec" || arg == "--nsec" {
                i += 1;
                let Some(secstr) = args.get(i) else {
                    error!("sec argument missing?");
                    continue;
                };

                match KeysSigner::parse(secstr) {
                    Ok(signer) => res.signer = Some(signer),
                    Err(_) => error!(
                        "failed to parse {} argument. Make sure to use hex or nsec.",
                        arg
                    ),
                }
            } else if arg == "--datapath" {
                i += 1;
                let Some(path) = args.get(i) else {
                    error!("datapath argument missing?");
                    continue;
                };
                res.datapath = Some(path.clone());
            } else if arg == "-r" || arg == "--relay" {
                i += 1;
                let Some(relay) = args.get(i) else {
                    error!("relay argument missing?");
                    continue;
                };
                res.relays.push(relay.clone());
            } else {
                unrecognized_args.insert(arg.clone());
            }

            i += 1;
        }

        (res, unrecognized_args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_relays_and_paths() {
        let (res, unknown) = Args::parse(&args(&[
            "-r",
            "wss://nos.lol",
            "--relay",
            "wss://relay.damus.io",
            "--datapath",
            "/tmp/chorus",
            "--debug",
            "--wat",
        ]));

        assert_eq!(res.relays, vec!["wss://nos.lol", "wss://relay.damus.io"]);
        assert_eq!(res.datapath.as_deref(), Some("/tmp/chorus"));
        assert!(res.debug);
        assert_eq!(unknown, BTreeSet::from(["--wat".to_owned()]));
    }

    #[test]
    fn test_keys() {
        let npub = "npub1xtscya34g58tk0z605fvr788k263gsu6cy9x0mhnm87echrgufzsevkk5s";
        let (res, _) = Args::parse(&args(&["--npub", npub]));
        assert_eq!(res.pubkey.and_then(|pk| pk.to_bech()).as_deref(), Some(npub));

        let (res, _) = Args::parse(&args(&["--sec", "not a key", "--pub"]));
        assert!(res.signer.is_none());
        assert!(res.pubkey.is_none());
    }
}
