//! Prints the IPAM CustomResourceDefinitions as a multi-document YAML stream.
//!
//! ```sh
//! cargo run -p crds --bin crdgen | kubectl apply -f -
//! ```

use crds::{IPAMBlock, IPAMHandle, IPPool};
use kube::CustomResourceExt;

fn main() -> Result<(), serde_yaml::Error> {
    for crd in [IPPool::crd(), IPAMBlock::crd(), IPAMHandle::crd()] {
        println!("---");
        print!("{}", serde_yaml::to_string(&crd)?);
    }
    Ok(())
}
