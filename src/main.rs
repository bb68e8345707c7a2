use std::{
    env, fs,
    io::Write,
    path::{Path, PathBuf},
};

use ed25519_dalek::SigningKey;
use rand::{rngs::OsRng, RngCore};

use dika_ledger::account::Address;
use dika_ledger::ledger::{Amount, LedgerSnapshot, TokenLedger};

//==================== shared helpers ====================//

fn usage() -> ! {
    eprintln!(
"Usage:
  dika keygen        --out-dir=<dir>
  dika init          <ledger.json> --owner=<addr-hex>
  dika info          <ledger.json>
  dika balance       <ledger.json> --account=<addr-hex>
  dika allowance     <ledger.json> --owner=<addr-hex> --spender=<addr-hex>
  dika transfer      <ledger.json> --sk-hex=<64-hex-secret> --to=<addr-hex> --amount=<units>
  dika approve       <ledger.json> --sk-hex=<64-hex-secret> --spender=<addr-hex> --amount=<units>
  dika transfer-from <ledger.json> --sk-hex=<64-hex-secret> --owner=<addr-hex> --to=<addr-hex> --amount=<units>
  dika verify        <ledger.json>
  dika history       <ledger.json>

Notes:
  - <ledger.json> holds the full ledger snapshot (balances, allowances, events, state root)
  - amounts are whole DIKA units; the supply is fixed at genesis (69420000)
  - sk-hex is a 32-byte Ed25519 secret key in hex (exactly 64 hex chars); the
    caller address is derived from its public key
  - addresses are 20 bytes in hex (40 hex chars); 'dika keygen' writes sk.hex,
    pk.hex and addr.hex"
    );
    std::process::exit(1)
}

fn arg_flag(args: &[String], name: &str) -> Option<String> {
    for a in args {
        if let Some(rest) = a.strip_prefix(&format!("--{}=", name)) {
            return Some(rest.to_string());
        }
    }
    None
}

#[inline]
fn require_flag(args: &[String], name: &str) -> String {
    if let Some(v) = arg_flag(args, name) {
        return v;
    }
    eprintln!("error: missing --{name}\n");
    usage();
}

fn read_all(p: &Path) -> Vec<u8> {
    fs::read(p).expect("read file")
}

fn write_all(p: &Path, bytes: &[u8]) {
    if let Some(parent) = p.parent() {
        fs::create_dir_all(parent).ok();
    }
    let mut f = fs::File::create(p).expect("create file");
    f.write_all(bytes).expect("write file");
}

fn parse_sk_hex(sk_hex: &str) -> SigningKey {
    let sk_bytes = match hex::decode(sk_hex.trim()) {
        Ok(bytes) => bytes,
        Err(err) => {
            eprintln!("error: invalid --sk-hex: {err}");
            std::process::exit(2);
        }
    };
    if sk_bytes.len() != 32 {
        eprintln!("error: --sk-hex must be 32 bytes (64 hex chars)");
        std::process::exit(2);
    }
    let mut arr = [0u8; 32];
    arr.copy_from_slice(&sk_bytes);
    SigningKey::from_bytes(&arr)
}

fn caller_address(sk_hex: &str) -> Address {
    let sk = parse_sk_hex(sk_hex);
    Address::from_verifying_key(&sk.verifying_key())
}

fn parse_address_arg(name: &str, value: &str) -> Address {
    match value.parse() {
        Ok(addr) => addr,
        Err(err) => {
            eprintln!("error: invalid {name}: {err}");
            std::process::exit(2);
        }
    }
}

fn load_ledger(path: &Path) -> TokenLedger {
    let bytes = read_all(path);
    let snapshot: LedgerSnapshot = serde_json::from_slice(&bytes).expect("ledger snapshot parse");
    match TokenLedger::restore(snapshot) {
        Ok(ledger) => ledger,
        Err(err) => {
            eprintln!("error: corrupt ledger file {}: {err}", path.display());
            std::process::exit(2);
        }
    }
}

// Rewrite via a sibling tmp file so a crash mid-write never clobbers the
// only copy of the ledger.
fn store_ledger(path: &Path, ledger: &TokenLedger) {
    let json = serde_json::to_vec_pretty(&ledger.snapshot()).expect("snapshot json");
    let tmp = path.with_extension("tmp");
    write_all(&tmp, &json);
    fs::rename(&tmp, path).expect("replace ledger file");
}

//==================== keys & genesis ====================//

fn keygen_cmd(args: &[String]) {
    let out_dir = PathBuf::from(require_flag(args, "out-dir"));
    fs::create_dir_all(&out_dir).expect("mkdir out-dir");

    let mut sk_bytes = [0u8; 32];
    OsRng.fill_bytes(&mut sk_bytes);
    let sk = SigningKey::from_bytes(&sk_bytes);
    let pk = sk.verifying_key();
    let addr = Address::from_verifying_key(&pk);

    write_all(&out_dir.join("sk.hex"), hex::encode(sk_bytes).as_bytes());
    write_all(
        &out_dir.join("pk.hex"),
        hex::encode(pk.as_bytes()).as_bytes(),
    );
    write_all(&out_dir.join("addr.hex"), addr.to_string().as_bytes());
    println!("keypair written → {}", out_dir.display());
}

fn init_cmd(args: &[String]) {
    if args.is_empty() {
        usage();
    }
    let path = PathBuf::from(&args[0]);
    if path.exists() {
        eprintln!("error: {} already exists (genesis runs once)", path.display());
        std::process::exit(2);
    }
    let owner = parse_address_arg("--owner", &require_flag(args, "owner"));
    if owner.is_zero() {
        eprintln!("error: --owner must not be the zero address");
        std::process::exit(2);
    }

    let ledger = TokenLedger::genesis(owner);
    store_ledger(&path, &ledger);
    println!(
        "Ledger initialized → {} ({} {} to {})",
        path.display(),
        ledger.total_supply(),
        ledger.symbol(),
        owner
    );
}

//==================== queries ====================//

fn info_cmd(args: &[String]) {
    if args.is_empty() {
        usage();
    }
    let path = PathBuf::from(&args[0]);
    let ledger = load_ledger(&path);
    println!("name:         {}", ledger.name());
    println!("symbol:       {}", ledger.symbol());
    println!("total supply: {}", ledger.total_supply());
    println!("events:       {}", ledger.events().len());
    println!("state root:   {}", hex::encode(ledger.state_root()));
}

fn balance_cmd(args: &[String]) {
    if args.is_empty() {
        usage();
    }
    let path = PathBuf::from(&args[0]);
    let account = parse_address_arg("--account", &require_flag(args, "account"));
    let ledger = load_ledger(&path);
    println!("{}", ledger.balance_of(&account));
}

fn allowance_cmd(args: &[String]) {
    if args.is_empty() {
        usage();
    }
    let path = PathBuf::from(&args[0]);
    let owner = parse_address_arg("--owner", &require_flag(args, "owner"));
    let spender = parse_address_arg("--spender", &require_flag(args, "spender"));
    let ledger = load_ledger(&path);
    println!("{}", ledger.allowance(&owner, &spender));
}

fn history_cmd(args: &[String]) {
    if args.is_empty() {
        usage();
    }
    let path = PathBuf::from(&args[0]);
    let ledger = load_ledger(&path);
    for event in ledger.events() {
        let line = serde_json::to_string(event).expect("event json");
        println!("{}", line);
    }
}

fn verify_cmd(args: &[String]) {
    if args.is_empty() {
        usage();
    }
    let path = PathBuf::from(&args[0]);
    let bytes = read_all(&path);
    let snapshot: LedgerSnapshot = serde_json::from_slice(&bytes).expect("ledger snapshot parse");
    match TokenLedger::restore(snapshot) {
        Ok(_) => println!("verify: OK (state root & supply match)"),
        Err(err) => {
            eprintln!("verify failed: {err}");
            std::process::exit(2);
        }
    }
}

//==================== mutations ====================//

fn transfer_cmd(args: &[String]) {
    if args.is_empty() {
        usage();
    }
    let path = PathBuf::from(&args[0]);
    let sender = caller_address(&require_flag(args, "sk-hex"));
    let to = parse_address_arg("--to", &require_flag(args, "to"));
    let amount: Amount = require_flag(args, "amount")
        .parse()
        .expect("invalid --amount (number)");

    let mut ledger = load_ledger(&path);
    if let Err(err) = ledger.transfer(&sender, &to, amount) {
        eprintln!("error: {err}");
        std::process::exit(2);
    }
    store_ledger(&path, &ledger);
    println!("Transferred {} {} {} → {}", amount, ledger.symbol(), sender, to);
}

fn approve_cmd(args: &[String]) {
    if args.is_empty() {
        usage();
    }
    let path = PathBuf::from(&args[0]);
    let owner = caller_address(&require_flag(args, "sk-hex"));
    let spender = parse_address_arg("--spender", &require_flag(args, "spender"));
    let amount: Amount = require_flag(args, "amount")
        .parse()
        .expect("invalid --amount (number)");

    let mut ledger = load_ledger(&path);
    if let Err(err) = ledger.approve(&owner, &spender, amount) {
        eprintln!("error: {err}");
        std::process::exit(2);
    }
    store_ledger(&path, &ledger);
    println!(
        "Approved {} {} for spender {} on {}",
        amount,
        ledger.symbol(),
        spender,
        owner
    );
}

fn transfer_from_cmd(args: &[String]) {
    if args.is_empty() {
        usage();
    }
    let path = PathBuf::from(&args[0]);
    let spender = caller_address(&require_flag(args, "sk-hex"));
    let owner = parse_address_arg("--owner", &require_flag(args, "owner"));
    let to = parse_address_arg("--to", &require_flag(args, "to"));
    let amount: Amount = require_flag(args, "amount")
        .parse()
        .expect("invalid --amount (number)");

    let mut ledger = load_ledger(&path);
    if let Err(err) = ledger.transfer_from(&spender, &owner, &to, amount) {
        eprintln!("error: {err}");
        std::process::exit(2);
    }
    store_ledger(&path, &ledger);
    println!(
        "Transferred {} {} {} → {} (spender {})",
        amount,
        ledger.symbol(),
        owner,
        to,
        spender
    );
}

//==================== main ====================//

fn main() {
    let mut args: Vec<String> = env::args().skip(1).collect();
    if args.is_empty() {
        usage();
    }
    if args.len() == 1 && (args[0] == "help" || args[0] == "--help" || args[0] == "-h") {
        usage();
    }
    let cmd = args.remove(0);
    match cmd.as_str() {
        "keygen" => keygen_cmd(&args),
        "init" => init_cmd(&args),
        "info" => info_cmd(&args),
        "balance" => balance_cmd(&args),
        "allowance" => allowance_cmd(&args),
        "transfer" => transfer_cmd(&args),
        "approve" => approve_cmd(&args),
        "transfer-from" => transfer_from_cmd(&args),
        "verify" => verify_cmd(&args),
        "history" => history_cmd(&args),
        _ => usage(),
    }
}
