//! Print the machine OS CustomResourceDefinitions as a multi-document YAML stream
//!
//! ```sh
//! cargo run -p machineos-crds --bin crdgen > config/crds.yaml
//! ```

use machineos_crds::all_crds;

fn main() -> Result<(), serde_yaml::Error> {
    for crd in all_crds() {
        println!("---");
        print!("{}", serde_yaml::to_string(&crd)?);
    }
    Ok(())
}
