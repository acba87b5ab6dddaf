fn main() -> anyhow::Result<()> {
    etcdstress::cli::execute()
}
