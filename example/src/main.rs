mod observer;
mod tree;

#[cfg_attr(test, test)]
fn main() {
    let _ = env_logger::builder().is_test(cfg!(test)).try_init();

    tree::main();
    observer::main();
}
